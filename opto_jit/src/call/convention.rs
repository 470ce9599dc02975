//! Calling conventions.
//!
//! Maps a call signature to argument locations for the register allocator.
//! Registers are abstract: integer register `n` is the `n`-th integer
//! argument register of the target, likewise for float registers.
//!
//! # Stack Slots
//!
//! Stack slots are 32 bits wide. A value that spills to the stack starts
//! at an even slot; 64-bit values take two slots. The upper-half entry of a
//! long or double in the signature gets [`VmReg::Bad`].

use crate::ir::types::{IdealReg, Type};

// =============================================================================
// Locations
// =============================================================================

/// Location of one argument or result slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmReg {
    /// Integer or pointer register.
    Int(u8),
    /// Floating-point register.
    Float(u8),
    /// Outgoing stack slot.
    Stack(u32),
    /// Unused (upper half of a two-slot value, or void).
    Bad,
}

impl VmReg {
    pub fn is_reg(self) -> bool {
        matches!(self, VmReg::Int(_) | VmReg::Float(_))
    }

    pub fn is_stack(self) -> bool {
        matches!(self, VmReg::Stack(_))
    }
}

// =============================================================================
// Conventions
// =============================================================================

/// Which calling convention a call uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// Compiled Java to compiled Java.
    Java,
    /// Calls into the VM runtime and leaf stubs.
    Native,
}

impl Convention {
    /// Integer argument registers available.
    pub const fn int_arg_regs(self) -> u8 {
        match self {
            Convention::Java => 6,
            Convention::Native => 6,
        }
    }

    /// Floating-point argument registers available.
    pub const fn float_arg_regs(self) -> u8 {
        8
    }

    /// Register holding a returned value of class `reg`.
    pub const fn return_reg(self, reg: IdealReg) -> VmReg {
        match reg {
            IdealReg::RegI | IdealReg::RegL | IdealReg::RegP | IdealReg::RegN => VmReg::Int(0),
            IdealReg::RegF | IdealReg::RegD => VmReg::Float(0),
            IdealReg::None | IdealReg::RegFlags => VmReg::Bad,
        }
    }
}

/// Argument locations of one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallingConvention {
    /// One location per signature entry.
    pub regs: Vec<VmReg>,
    /// Outgoing stack slots used.
    pub stack_slots: u32,
}

/// Assign locations to the parameter types of a signature.
pub fn calling_convention(conv: Convention, domain: &[Type]) -> CallingConvention {
    let mut regs = Vec::with_capacity(domain.len());
    let (mut ints, mut floats) = (0u8, 0u8);
    let mut stk: u32 = 0;

    let mut spill = |wide: bool| {
        stk = stk.next_multiple_of(2);
        let slot = stk;
        stk += if wide { 2 } else { 1 };
        VmReg::Stack(slot)
    };

    for ty in domain {
        let reg = match ty.ideal_reg() {
            IdealReg::None if *ty == Type::Half => VmReg::Bad,
            IdealReg::RegI | IdealReg::RegL | IdealReg::RegP | IdealReg::RegN => {
                if ints < conv.int_arg_regs() {
                    ints += 1;
                    VmReg::Int(ints - 1)
                } else {
                    spill(ty.ideal_reg() == IdealReg::RegL || ty.ideal_reg() == IdealReg::RegP)
                }
            }
            IdealReg::RegF | IdealReg::RegD => {
                if floats < conv.float_arg_regs() {
                    floats += 1;
                    VmReg::Float(floats - 1)
                } else {
                    spill(ty.ideal_reg() == IdealReg::RegD)
                }
            }
            IdealReg::None | IdealReg::RegFlags => VmReg::Bad,
        };
        regs.push(reg);
    }

    CallingConvention {
        regs,
        stack_slots: stk,
    }
}

impl crate::ir::graph::Graph {
    /// Argument locations of call `call`.
    pub fn calling_convention(&self, call: crate::ir::node::NodeId) -> CallingConvention {
        let data = self.call(call);
        let conv = if data.kind.is_java() {
            Convention::Java
        } else {
            Convention::Native
        };
        calling_convention(conv, &data.tf.domain)
    }

    /// Where call `call` leaves its result.
    pub fn return_reg(&self, call: crate::ir::node::NodeId) -> VmReg {
        let data = self.call(call);
        let conv = if data.kind.is_java() {
            Convention::Java
        } else {
            Convention::Native
        };
        match &data.tf.range {
            Some(t) => conv.return_reg(t.ideal_reg()),
            None => VmReg::Bad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::MethodId;
    use crate::ir::graph::Graph;
    use crate::ir::types::{BasicType, TypeFunc};

    #[test]
    fn test_registers_then_stack() {
        let params = [BasicType::Int; 8];
        let tf = TypeFunc::new(&params, BasicType::Void);
        let cc = calling_convention(Convention::Java, &tf.domain);
        assert_eq!(cc.regs[0], VmReg::Int(0));
        assert_eq!(cc.regs[5], VmReg::Int(5));
        assert_eq!(cc.regs[6], VmReg::Stack(0));
        assert_eq!(cc.regs[7], VmReg::Stack(2));
        assert_eq!(cc.stack_slots, 3);
    }

    #[test]
    fn test_wide_values_mark_upper_half_bad() {
        let tf = TypeFunc::new(&[BasicType::Long, BasicType::Double, BasicType::Float], BasicType::Void);
        let cc = calling_convention(Convention::Java, &tf.domain);
        assert_eq!(
            cc.regs,
            vec![VmReg::Int(0), VmReg::Bad, VmReg::Float(0), VmReg::Bad, VmReg::Float(1)]
        );
        assert_eq!(cc.stack_slots, 0);
    }

    #[test]
    fn test_call_convention_and_return() {
        let mut g = Graph::new();
        let tf = TypeFunc::new(&[BasicType::Object], BasicType::Double);
        let c = g.make_static_java_call(tf, MethodId(0));
        assert_eq!(g.calling_convention(c).regs, vec![VmReg::Int(0)]);
        assert_eq!(g.return_reg(c), VmReg::Float(0));
        assert!(VmReg::Int(0).is_reg());
        assert!(!VmReg::Bad.is_stack());
    }
}
