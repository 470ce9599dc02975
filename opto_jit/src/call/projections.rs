//! Structural successors of a call.

use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::NodeKind;
use crate::ir::types::TypeFunc;

use super::{CATCH_ALL_INDEX, FALL_THROUGH_INDEX};

/// The fixed set of nodes hanging off a call. Any of them may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallProjections {
    pub fallthrough_proj: Option<NodeId>,
    pub fallthrough_catchproj: Option<NodeId>,
    pub fallthrough_memproj: Option<NodeId>,
    pub fallthrough_ioproj: Option<NodeId>,
    pub catchall_catchproj: Option<NodeId>,
    pub catchall_memproj: Option<NodeId>,
    pub catchall_ioproj: Option<NodeId>,
    pub resproj: Option<NodeId>,
    pub exobj: Option<NodeId>,
}

impl CallProjections {
    /// Every projection found, in role order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> {
        [
            self.fallthrough_proj,
            self.fallthrough_catchproj,
            self.fallthrough_memproj,
            self.fallthrough_ioproj,
            self.catchall_catchproj,
            self.catchall_memproj,
            self.catchall_ioproj,
            self.resproj,
            self.exobj,
        ]
        .into_iter()
        .flatten()
    }
}

impl Graph {
    /// Locate the projections of `call` by role.
    ///
    /// Unused projections are skipped. With `separate_io_proj`, the
    /// io-use projections feed the exceptional path; otherwise a single
    /// projection serves both paths and lands in the fall-through slot.
    /// `do_asserts` checks that a call which can return has both its
    /// control projection and the fall-through catch projection.
    pub fn extract_projections(
        &self,
        call: NodeId,
        separate_io_proj: bool,
        do_asserts: bool,
    ) -> CallProjections {
        let mut projs = CallProjections::default();
        for &pn in self.outs(call) {
            let NodeKind::Proj { con, io_use } = *self.kind(pn) else {
                continue;
            };
            if self.outcnt(pn) == 0 {
                continue;
            }
            match con as usize {
                TypeFunc::CONTROL => {
                    projs.fallthrough_proj = Some(pn);
                    let Some(cn) = self.unique_ctrl_out(pn) else {
                        continue;
                    };
                    if !matches!(self.kind(cn), NodeKind::Catch) {
                        continue;
                    }
                    for &cpn in self.outs(cn) {
                        match *self.kind(cpn) {
                            NodeKind::CatchProj { con: FALL_THROUGH_INDEX, .. } => {
                                projs.fallthrough_catchproj = Some(cpn)
                            }
                            NodeKind::CatchProj { con: CATCH_ALL_INDEX, .. } => {
                                projs.catchall_catchproj = Some(cpn)
                            }
                            _ => {}
                        }
                    }
                }
                TypeFunc::I_O => {
                    if io_use && separate_io_proj {
                        projs.catchall_ioproj = Some(pn);
                    } else {
                        projs.fallthrough_ioproj = Some(pn);
                    }
                    for &e in self.outs(pn) {
                        let is_exobj = matches!(self.kind(e), NodeKind::CreateEx)
                            && self
                                .input(e, 0)
                                .is_some_and(|c| matches!(self.kind(c), NodeKind::CatchProj { .. }))
                            && self.outcnt(e) > 0;
                        if is_exobj {
                            debug_assert!(projs.exobj.is_none(), "only one exception object");
                            projs.exobj = Some(e);
                        }
                    }
                }
                TypeFunc::MEMORY => {
                    if io_use && separate_io_proj {
                        projs.catchall_memproj = Some(pn);
                    } else {
                        projs.fallthrough_memproj = Some(pn);
                    }
                }
                TypeFunc::PARMS => projs.resproj = Some(pn),
                _ => debug_assert!(false, "unexpected projection {} of {}", con, call),
            }
        }

        debug_assert!(
            !do_asserts || projs.fallthrough_proj.is_some(),
            "{} has no control projection",
            call
        );
        debug_assert!(
            !do_asserts || projs.fallthrough_catchproj.is_some(),
            "{} has no fall-through catch projection",
            call
        );
        projs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::MethodId;
    use crate::ir::types::{BasicType, Type};

    /// A call with the full projection set a throwing Java call gets, each
    /// projection given a user.
    fn wired_call(g: &mut Graph) -> (NodeId, CallProjections) {
        let tf = TypeFunc::new(&[BasicType::Int], BasicType::Int);
        let call = g.make_static_java_call(tf, MethodId(0));
        let ctrl = g.make_proj(call, TypeFunc::CONTROL as u32, false, Type::Control);
        let ex_io = g.make_proj(call, TypeFunc::I_O as u32, true, Type::Abio);
        let ex_mem = g.make_proj(call, TypeFunc::MEMORY as u32, true, Type::Memory);
        let shape = g.make_catch_shape(ctrl, ex_io, Type::oop(None));
        let io = g.make_proj(call, TypeFunc::I_O as u32, false, Type::Abio);
        let mem = g.make_proj(call, TypeFunc::MEMORY as u32, false, Type::Memory);
        let res = g.make_proj(call, TypeFunc::PARMS as u32, false, Type::INT);

        let root = g.root();
        for n in [shape.fall_through, ex_mem, io, mem, res, shape.ex_oop] {
            let sink = g.add_node(NodeKind::Halt, Type::Control, &[Some(n)]);
            g.add_req(root, Some(sink));
        }
        let expected = CallProjections {
            fallthrough_proj: Some(ctrl),
            fallthrough_catchproj: Some(shape.fall_through),
            fallthrough_memproj: Some(mem),
            fallthrough_ioproj: Some(io),
            catchall_catchproj: Some(shape.catch_all),
            catchall_memproj: Some(ex_mem),
            catchall_ioproj: Some(ex_io),
            resproj: Some(res),
            exobj: Some(shape.ex_oop),
        };
        (call, expected)
    }

    #[test]
    fn test_extract_all_roles() {
        let mut g = Graph::new();
        let (call, expected) = wired_call(&mut g);
        assert_eq!(g.extract_projections(call, true, true), expected);
        assert_eq!(expected.iter().count(), 9);
    }

    #[test]
    fn test_shared_io_proj_lands_in_fallthrough() {
        let mut g = Graph::new();
        let (call, expected) = wired_call(&mut g);
        let projs = g.extract_projections(call, false, true);
        assert!(projs.catchall_ioproj.is_none());
        assert!(projs.fallthrough_ioproj == expected.fallthrough_ioproj
            || projs.fallthrough_ioproj == expected.catchall_ioproj);
    }

    #[test]
    fn test_missing_projections_tolerated() {
        let mut g = Graph::new();
        let tf = TypeFunc::new(&[], BasicType::Void);
        let call = g.make_static_java_call(tf, MethodId(0));
        let unused = g.make_proj(call, TypeFunc::PARMS as u32, false, Type::INT);
        let projs = g.extract_projections(call, true, false);
        assert_eq!(projs, CallProjections::default());
        assert_eq!(g.outcnt(unused), 0);
    }
}
