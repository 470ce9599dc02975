use opto_jit::ci::{MethodId, MethodRegistry};
use opto_jit::ir::{Graph, NodeId, NodeKind, Type};
use opto_jit::{Compile, CompileOptions};
use std::sync::Arc;

// Deterministic sequence so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound.max(1)
    }
}

fn value_pool(g: &mut Graph, consts: usize, adds: usize) -> Vec<NodeId> {
    let mut pool: Vec<NodeId> = (0..consts as i32).map(|v| g.makecon(Type::int_con(v))).collect();
    for i in 0..adds {
        let a = pool[i % pool.len()];
        let b = pool[(i * 7 + 3) % pool.len()];
        let n = g.add_node(NodeKind::AddI, Type::INT, &[None, Some(a), Some(b)]);
        pool.push(n);
    }
    pool
}

#[test]
fn test_edges_stay_reciprocal_under_mutation() {
    let mut g = Graph::new();
    let pool = value_pool(&mut g, 4, 24);
    let users: Vec<NodeId> = pool[4..].to_vec();
    let mut rng = Lcg(0x5eed);

    for step in 0..2_000 {
        let n = users[rng.next(users.len())];
        let def = pool[rng.next(pool.len())];
        let req = g.req(n);
        match rng.next(7) {
            0 => g.set_req(n, 1 + rng.next(req - 1), Some(def)),
            1 => g.add_req(n, Some(def)),
            2 if req > 3 => g.del_req(n, 2 + rng.next(req - 2)),
            3 if req > 3 => g.del_req_ordered(n, 2 + rng.next(req - 2)),
            4 => g.ins_req(n, 1 + rng.next(req - 1), Some(def)),
            5 if def != n => g.add_prec(n, def),
            6 => {
                let end = g.node(n).prec_end();
                if end > req {
                    g.rm_prec(n, req + rng.next(end - req));
                }
            }
            _ => {}
        }
        if let Err(e) = g.verify() {
            panic!("step {}: {}", step, e);
        }
    }
}

#[test]
fn test_precedence_edges_stay_packed() {
    let mut g = Graph::new();
    let pool = value_pool(&mut g, 6, 1);
    let n = pool[6];
    for &d in &pool[..6] {
        g.add_prec(n, d);
    }
    // Remove from the middle, then grow the required inputs over them.
    g.rm_prec(n, g.req(n) + 2);
    g.add_req(n, Some(pool[0]));
    g.add_req(n, Some(pool[1]));
    g.rm_prec(n, g.req(n));

    let node = g.node(n);
    let tail = &node.inputs()[node.req()..];
    let first_null = tail.iter().position(Option::is_none).unwrap_or(tail.len());
    assert!(tail[first_null..].iter().all(Option::is_none));
    assert_eq!(node.precs().count(), 4);
    g.verify().unwrap();
}

#[test]
fn test_dead_nodes_have_no_uses() {
    let mut g = Graph::new();
    let pool = value_pool(&mut g, 3, 6);
    // Disconnect the leaves first so no dead node keeps a user.
    for &n in pool[3..].iter().rev() {
        if g.outcnt(n) == 0 {
            g.disconnect_inputs(n);
        }
    }
    for (n, node) in g.iter() {
        if g.is_dead(n) {
            assert_eq!(node.outcnt(), 0, "{} is dead with uses", n);
        }
    }
    g.verify().unwrap();
}

fn compile() -> Compile {
    Compile::new(Arc::new(MethodRegistry::new()), MethodId(0), CompileOptions::default())
}

/// Build the same shape with the dead chain created before or after the
/// useful one, root it, and remove the rest.
fn pruned_shape(dead_first: bool) -> Vec<(String, Vec<String>)> {
    let mut c = compile();
    let g = &mut c.graph;
    let x = g.makecon(Type::int_con(1));
    let y = g.makecon(Type::int_con(2));

    let build_dead = |g: &mut Graph| {
        let d1 = g.add_node(NodeKind::AddI, Type::INT, &[None, Some(x), Some(y)]);
        let d2 = g.add_node(NodeKind::SubI, Type::INT, &[None, Some(d1), Some(x)]);
        g.add_node(NodeKind::AddI, Type::INT, &[None, Some(d2), Some(d1)]);
    };
    if dead_first {
        build_dead(g);
    }
    let u1 = g.add_node(NodeKind::AddI, Type::INT, &[None, Some(x), Some(y)]);
    let u2 = g.add_node(NodeKind::SubI, Type::INT, &[None, Some(u1), Some(y)]);
    let root = g.root();
    let ret = g.add_node(NodeKind::Return, Type::Control, &[None, None, None, None, None, Some(u2)]);
    g.add_req(root, Some(ret));
    if !dead_first {
        build_dead(g);
    }

    c.remove_useless_nodes();
    c.graph.verify().unwrap();

    let mut shape: Vec<(String, Vec<String>)> = c
        .graph
        .iter()
        .map(|(_, node)| {
            let mut ins: Vec<String> = node
                .inputs()
                .iter()
                .flatten()
                .map(|&d| format!("{:?}", c.graph.opcode(d)))
                .collect();
            ins.sort();
            (format!("{:?}/{}", node.opcode(), node.outcnt()), ins)
        })
        .collect();
    shape.sort();
    shape
}

#[test]
fn test_useless_removal_ignores_creation_order() {
    assert_eq!(pruned_shape(true), pruned_shape(false));
}
