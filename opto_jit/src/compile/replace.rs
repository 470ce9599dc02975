//! Global replace-by-use.

use crate::ir::node::NodeId;

use super::Compile;

impl Compile {
    /// Redirect every use of `n` to `nn`.
    ///
    /// Uses are visited from the last one. A hashed use is taken out of the
    /// value-numbering table while its edges change and put back after;
    /// every touched use is queued for another rewrite pass.
    pub fn gvn_replace_by(&mut self, n: NodeId, nn: NodeId) {
        if n == nn {
            return;
        }
        while let Some(&user) = self.graph.outs(n).last() {
            let was_hashed = self.graph.hash_delete(user);
            let found = self.graph.replace_edge(user, n, Some(nn));
            debug_assert!(found > 0, "{} listed as a use of {} without an edge", user, n);
            if was_hashed {
                self.graph.hash_find_insert(user);
            }
            self.record_for_igvn(user);
        }
    }
}
