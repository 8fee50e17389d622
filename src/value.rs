// Copyright (c) 2017-2021 Fabian Schuiki

//! Integer values
//!
//! This module implements integer value arithmetic.

use crate::ir::Opcode;
use crate::ty::{int_ty, Type};
use num::{bigint::ToBigInt, traits::*, BigInt, BigUint};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};

/// An integer value.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IntValue {
    /// The width of the value in bits.
    pub width: usize,
    /// The value itself.
    pub value: BigUint,
}

impl IntValue {
    /// Create a zero value.
    pub fn zero(width: usize) -> Self {
        Self {
            width,
            value: BigUint::zero(),
        }
    }

    /// Create a value with all bits set to one.
    pub fn all_ones(width: usize) -> Self {
        Self {
            width,
            value: (BigUint::one() << width) - 1usize,
        }
    }

    /// Create a new integer value from a `usize`.
    pub fn from_usize(width: usize, value: usize) -> Self {
        Self::from_unsigned(width, value.into())
    }

    /// Create a new integer value from an `isize`.
    pub fn from_isize(width: usize, value: isize) -> Self {
        Self::from_signed(width, value.into())
    }

    /// Create a new integer value from a signed `BigInt` value.
    pub fn from_signed(width: usize, value: BigInt) -> Self {
        let modulus = BigInt::one() << width;
        let mut v = value % &modulus;
        if v.is_negative() {
            v += modulus;
        }
        assert!(!v.is_negative());
        Self::from_unsigned(width, v.to_biguint().unwrap())
    }

    /// Create a new integer value from an unsigned `BigUint` value.
    pub fn from_unsigned(width: usize, value: BigUint) -> Self {
        let value = value % (BigUint::one() << width);
        Self { width, value }
    }

    /// Convert the value to a signed `BigInt`.
    pub fn to_signed(&self) -> BigInt {
        let sign_mask = BigUint::one() << (self.width - 1);
        if (&self.value & &sign_mask).is_zero() {
            self.value.to_bigint().unwrap()
        } else {
            self.value.to_bigint().unwrap() - (BigInt::one() << self.width)
        }
    }

    /// Convert the value to a usize.
    pub fn to_usize(&self) -> usize {
        self.value.to_usize().unwrap()
    }

    /// Check if the value is zero.
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Check if the value is one.
    pub fn is_one(&self) -> bool {
        self.value.is_one()
    }

    /// Check if the value has every bit set to one.
    pub fn is_all_ones(&self) -> bool {
        self.value == Self::all_ones(self.width).value
    }

    /// Get the type of the value.
    pub fn ty(&self) -> Type {
        int_ty(self.width)
    }
}

impl Display for IntValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "i{} {}", self.width, self.value)
    }
}

impl Debug for IntValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl From<(usize, usize)> for IntValue {
    fn from(v: (usize, usize)) -> Self {
        IntValue::from_usize(v.0, v.1)
    }
}

impl From<(usize, isize)> for IntValue {
    fn from(v: (usize, isize)) -> Self {
        IntValue::from_isize(v.0, v.1)
    }
}

/// Unary operators.
impl IntValue {
    /// Compute `not`.
    pub fn not(&self) -> IntValue {
        let max = (BigUint::one() << self.width) - BigUint::one();
        let v = &max - &self.value;
        IntValue::from_unsigned(self.width, v)
    }

    /// Compute `neg`.
    pub fn neg(&self) -> IntValue {
        let max = BigUint::one() << self.width;
        let v = &max - &self.value;
        IntValue::from_unsigned(self.width, v)
    }
}

/// Binary operators.
impl IntValue {
    /// Compute `add`.
    pub fn add(&self, other: &Self) -> IntValue {
        IntValue::from_unsigned(self.width, &self.value + &other.value)
    }

    /// Compute `sub`.
    pub fn sub(&self, other: &Self) -> IntValue {
        IntValue::from_signed(self.width, self.to_signed() - other.to_signed())
    }

    /// Compute `and`.
    pub fn and(&self, other: &Self) -> IntValue {
        IntValue::from_unsigned(self.width, &self.value & &other.value)
    }

    /// Compute `or`.
    pub fn or(&self, other: &Self) -> IntValue {
        IntValue::from_unsigned(self.width, &self.value | &other.value)
    }

    /// Compute `xor`.
    pub fn xor(&self, other: &Self) -> IntValue {
        IntValue::from_unsigned(self.width, &self.value ^ &other.value)
    }

    /// Compute `umul`.
    pub fn umul(&self, other: &Self) -> IntValue {
        IntValue::from_unsigned(self.width, &self.value * &other.value)
    }

    /// Compute `udiv`.
    pub fn udiv(&self, other: &Self) -> IntValue {
        IntValue::from_unsigned(self.width, &self.value / &other.value)
    }

    /// Compute `urem`.
    pub fn urem(&self, other: &Self) -> IntValue {
        IntValue::from_unsigned(self.width, &self.value % &other.value)
    }

    /// Compute `smul`.
    pub fn smul(&self, other: &Self) -> IntValue {
        IntValue::from_signed(self.width, self.to_signed() * other.to_signed())
    }

    /// Compute `sdiv`.
    pub fn sdiv(&self, other: &Self) -> IntValue {
        IntValue::from_signed(self.width, self.to_signed() / other.to_signed())
    }

    /// Compute `srem`.
    pub fn srem(&self, other: &Self) -> IntValue {
        IntValue::from_signed(self.width, self.to_signed() % other.to_signed())
    }

    /// Compute `shl`.
    pub fn shl(&self, other: &Self) -> IntValue {
        let amount = other.value.to_usize().unwrap_or(self.width);
        if amount >= self.width {
            return IntValue::zero(self.width);
        }
        IntValue::from_unsigned(self.width, &self.value << amount)
    }

    /// Compute `shr`, shifting in zeros.
    pub fn shr(&self, other: &Self) -> IntValue {
        let amount = other.value.to_usize().unwrap_or(self.width);
        if amount >= self.width {
            return IntValue::zero(self.width);
        }
        IntValue::from_unsigned(self.width, &self.value >> amount)
    }

    /// Compute `ashr`, shifting in copies of the sign bit.
    pub fn ashr(&self, other: &Self) -> IntValue {
        let amount = other.value.to_usize().unwrap_or(self.width);
        let amount = std::cmp::min(amount, self.width - 1);
        IntValue::from_signed(self.width, self.to_signed() >> amount)
    }
}

/// Comparisons.
impl IntValue {
    /// Compute `==`.
    pub fn comp_eq(&self, other: &Self) -> bool {
        assert_eq!(self.width, other.width);
        self.value == other.value
    }

    /// Compute `!=`.
    pub fn comp_neq(&self, other: &Self) -> bool {
        assert_eq!(self.width, other.width);
        self.value != other.value
    }

    /// Compute unsigned `<`.
    pub fn ult(&self, other: &Self) -> bool {
        assert_eq!(self.width, other.width);
        self.value < other.value
    }

    /// Compute unsigned `>`.
    pub fn ugt(&self, other: &Self) -> bool {
        assert_eq!(self.width, other.width);
        self.value > other.value
    }

    /// Compute unsigned `<=`.
    pub fn ule(&self, other: &Self) -> bool {
        assert_eq!(self.width, other.width);
        self.value <= other.value
    }

    /// Compute unsigned `>=`.
    pub fn uge(&self, other: &Self) -> bool {
        assert_eq!(self.width, other.width);
        self.value >= other.value
    }

    /// Compute signed `<`.
    pub fn slt(&self, other: &Self) -> bool {
        assert_eq!(self.width, other.width);
        self.to_signed() < other.to_signed()
    }

    /// Compute signed `>`.
    pub fn sgt(&self, other: &Self) -> bool {
        assert_eq!(self.width, other.width);
        self.to_signed() > other.to_signed()
    }

    /// Compute signed `<=`.
    pub fn sle(&self, other: &Self) -> bool {
        assert_eq!(self.width, other.width);
        self.to_signed() <= other.to_signed()
    }

    /// Compute signed `>=`.
    pub fn sge(&self, other: &Self) -> bool {
        assert_eq!(self.width, other.width);
        self.to_signed() >= other.to_signed()
    }
}

/// Opcode implementations.
impl IntValue {
    /// Execute a unary opcode.
    pub fn try_unary_op(op: Opcode, arg: &IntValue) -> Option<IntValue> {
        Some(match op {
            Opcode::Not => arg.not(),
            Opcode::Neg => arg.neg(),
            _ => return None,
        })
    }

    /// Execute a binary opcode.
    pub fn try_binary_op(op: Opcode, lhs: &IntValue, rhs: &IntValue) -> Option<IntValue> {
        Some(match op {
            Opcode::Add => lhs.add(rhs),
            Opcode::Sub => lhs.sub(rhs),
            Opcode::And => lhs.and(rhs),
            Opcode::Or => lhs.or(rhs),
            Opcode::Xor => lhs.xor(rhs),
            Opcode::Smul => lhs.smul(rhs),
            Opcode::Sdiv if !rhs.is_zero() => lhs.sdiv(rhs),
            Opcode::Srem if !rhs.is_zero() => lhs.srem(rhs),
            Opcode::Umul => lhs.umul(rhs),
            Opcode::Udiv if !rhs.is_zero() => lhs.udiv(rhs),
            Opcode::Urem if !rhs.is_zero() => lhs.urem(rhs),
            Opcode::Shl => lhs.shl(rhs),
            Opcode::Shr => lhs.shr(rhs),
            Opcode::Ashr => lhs.ashr(rhs),
            _ => return None,
        })
    }

    /// Execute a comparison opcode.
    pub fn try_compare_op(op: Opcode, lhs: &IntValue, rhs: &IntValue) -> Option<IntValue> {
        let v = match op {
            Opcode::Eq => lhs.comp_eq(rhs),
            Opcode::Neq => lhs.comp_neq(rhs),
            Opcode::Ult => lhs.ult(rhs),
            Opcode::Ugt => lhs.ugt(rhs),
            Opcode::Ule => lhs.ule(rhs),
            Opcode::Uge => lhs.uge(rhs),
            Opcode::Slt => lhs.slt(rhs),
            Opcode::Sgt => lhs.sgt(rhs),
            Opcode::Sle => lhs.sle(rhs),
            Opcode::Sge => lhs.sge(rhs),
            _ => return None,
        };
        Some(IntValue::from_usize(1, v as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign() {
        assert_eq!(IntValue::from_isize(8, 9), IntValue::from_usize(8, 9));
        assert_eq!(IntValue::from_isize(8, -9), IntValue::from_usize(8, 247));
        assert_eq!(IntValue::from_isize(8, 9).to_signed(), BigInt::from(9));
        assert_eq!(IntValue::from_isize(8, -9).to_signed(), BigInt::from(-9));
    }

    #[test]
    fn add() {
        let a = IntValue::from_usize(8, 7);
        let b = IntValue::from_usize(8, 2);
        let an = a.neg();
        let bn = b.neg();

        assert_eq!(a.add(&b), IntValue::from_usize(8, 9));
        assert_eq!(a.add(&bn), IntValue::from_usize(8, 5));
        assert_eq!(an.add(&b), IntValue::from_isize(8, -5));
        assert_eq!(an.add(&bn), IntValue::from_isize(8, -9));
    }

    #[test]
    fn sub() {
        let a = IntValue::from_usize(8, 7);
        let b = IntValue::from_usize(8, 2);
        let an = a.neg();
        let bn = b.neg();

        assert_eq!(a.sub(&b), IntValue::from_usize(8, 5));
        assert_eq!(a.sub(&bn), IntValue::from_usize(8, 9));
        assert_eq!(an.sub(&b), IntValue::from_isize(8, -9));
        assert_eq!(an.sub(&bn), IntValue::from_isize(8, -5));
    }

    #[test]
    fn shifts() {
        let a = IntValue::from_usize(8, 0b1001_0000);
        assert_eq!(a.shl(&IntValue::from_usize(8, 1)), IntValue::from_usize(8, 0b0010_0000));
        assert_eq!(a.shr(&IntValue::from_usize(8, 4)), IntValue::from_usize(8, 0b0000_1001));
        assert_eq!(a.ashr(&IntValue::from_usize(8, 4)), IntValue::from_usize(8, 0b1111_1001));
        assert_eq!(a.shr(&IntValue::from_usize(8, 200)), IntValue::zero(8));
    }
}
