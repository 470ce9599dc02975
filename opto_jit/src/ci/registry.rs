//! In-memory metadata oracle.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::{
    CallSiteInfo, DeoptReason, KlassId, KlassInfo, MethodId, MethodInfo, MethodOracle, ObjectId,
};

#[derive(Default)]
struct RegistryInner {
    methods: Vec<Arc<MethodInfo>>,
    klasses: Vec<Arc<KlassInfo>>,
    mh_targets: FxHashMap<ObjectId, MethodId>,
    member_targets: FxHashMap<ObjectId, MethodId>,
}

/// Thread-safe metadata registry.
///
/// Definitions are published behind an `RwLock`; compiles only read, so
/// concurrent compile threads share one registry through `Arc`.
#[derive(Default)]
pub struct MethodRegistry {
    inner: RwLock<RegistryInner>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class and return its id.
    pub fn define_klass(&self, mut info: KlassInfo) -> KlassId {
        let mut inner = self.inner.write();
        let id = KlassId(inner.klasses.len() as u32);
        info.id = id;
        if let Some(sup) = info.super_klass {
            if let Some(parent) = inner.klasses.get_mut(sup.0 as usize) {
                Arc::make_mut(parent).is_leaf = false;
            }
        }
        inner.klasses.push(Arc::new(info));
        id
    }

    /// Register a method on its holder and return its id.
    pub fn define_method(&self, mut info: MethodInfo) -> MethodId {
        let mut inner = self.inner.write();
        let id = MethodId(inner.methods.len() as u32);
        info.id = id;
        if let Some(holder) = inner.klasses.get_mut(info.holder.0 as usize) {
            Arc::make_mut(holder).methods.push(id);
        }
        inner.methods.push(Arc::new(info));
        id
    }

    /// Replace a method's properties through `f`.
    pub fn update_method(&self, m: MethodId, f: impl FnOnce(&mut MethodInfo)) {
        let mut inner = self.inner.write();
        if let Some(info) = inner.methods.get_mut(m.0 as usize) {
            f(Arc::make_mut(info));
        }
    }

    /// Describe the call at `bci` of `caller`.
    pub fn set_call_site(&self, caller: MethodId, bci: u32, site: CallSiteInfo) {
        self.update_method(caller, |info| {
            info.call_sites.insert(bci, site);
        });
    }

    /// Record `count` traps of `reason` at `bci`.
    pub fn record_traps(&self, m: MethodId, bci: u32, reason: DeoptReason, count: u32) {
        self.update_method(m, |info| {
            *info.traps.entry((bci, reason)).or_insert(0) += count;
        });
    }

    pub fn bind_method_handle(&self, mh: ObjectId, target: MethodId) {
        self.inner.write().mh_targets.insert(mh, target);
    }

    pub fn bind_member_name(&self, member: ObjectId, target: MethodId) {
        self.inner.write().member_targets.insert(member, target);
    }

    fn overrides(a: &MethodInfo, b: &MethodInfo) -> bool {
        a.name == b.name && a.signature == b.signature
    }

    fn subclasses(inner: &RegistryInner, k: KlassId) -> Vec<KlassId> {
        let reg = MethodRegistryView(inner);
        inner
            .klasses
            .iter()
            .filter(|c| !c.is_interface && reg.is_subclass_of(c.id, k))
            .map(|c| c.id)
            .collect()
    }
}

struct MethodRegistryView<'a>(&'a RegistryInner);

impl MethodRegistryView<'_> {
    fn klass(&self, k: KlassId) -> Option<&Arc<KlassInfo>> {
        self.0.klasses.get(k.0 as usize)
    }

    fn is_subclass_of(&self, sub: KlassId, sup: KlassId) -> bool {
        let mut cur = Some(sub);
        while let Some(k) = cur {
            if k == sup {
                return true;
            }
            let Some(info) = self.klass(k) else {
                return false;
            };
            if info.interfaces.iter().any(|&i| self.is_subclass_of(i, sup)) {
                return true;
            }
            cur = info.super_klass;
        }
        false
    }

    fn resolve_invoke(&self, receiver: KlassId, m: MethodId) -> Option<MethodId> {
        let decl = self.0.methods.get(m.0 as usize)?;
        let mut cur = Some(receiver);
        while let Some(k) = cur {
            let info = self.klass(k)?;
            for &cand in &info.methods {
                let c = &self.0.methods[cand.0 as usize];
                if MethodRegistry::overrides(c, decl) && !c.flags.contains(super::MethodFlags::ABSTRACT) {
                    return Some(cand);
                }
            }
            cur = info.super_klass;
        }
        None
    }
}

impl MethodOracle for MethodRegistry {
    fn method(&self, m: MethodId) -> Option<Arc<MethodInfo>> {
        self.inner.read().methods.get(m.0 as usize).cloned()
    }

    fn klass(&self, k: KlassId) -> Option<Arc<KlassInfo>> {
        self.inner.read().klasses.get(k.0 as usize).cloned()
    }

    fn call_site(&self, caller: MethodId, bci: u32) -> Option<CallSiteInfo> {
        let inner = self.inner.read();
        inner
            .methods
            .get(caller.0 as usize)
            .and_then(|m| m.call_sites.get(&bci).cloned())
    }

    fn resolve_invoke(&self, receiver: KlassId, m: MethodId) -> Option<MethodId> {
        MethodRegistryView(&self.inner.read()).resolve_invoke(receiver, m)
    }

    fn unique_concrete_method(&self, receiver: KlassId, m: MethodId) -> Option<MethodId> {
        let inner = self.inner.read();
        let view = MethodRegistryView(&inner);
        let mut found = None;
        for k in MethodRegistry::subclasses(&inner, receiver) {
            let Some(target) = view.resolve_invoke(k, m) else {
                continue;
            };
            match found {
                None => found = Some(target),
                Some(f) if f == target => {}
                Some(_) => return None,
            }
        }
        found
    }

    fn method_handle_target(&self, mh: ObjectId) -> Option<MethodId> {
        self.inner.read().mh_targets.get(&mh).copied()
    }

    fn member_name_target(&self, member: ObjectId) -> Option<MethodId> {
        self.inner.read().member_targets.get(&member).copied()
    }

    fn is_subclass_of(&self, sub: KlassId, sup: KlassId) -> bool {
        MethodRegistryView(&self.inner.read()).is_subclass_of(sub, sup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::{MethodFlags, Signature};
    use crate::ir::types::BasicType;

    fn virtual_method(reg: &MethodRegistry, holder: KlassId) -> MethodId {
        reg.define_method(MethodInfo::new(
            "size",
            holder,
            Signature::new(&[], BasicType::Int),
            MethodFlags::PARSEABLE,
        ))
    }

    #[test]
    fn test_resolve_invoke_walks_supers() {
        let reg = MethodRegistry::new();
        let base = reg.define_klass(KlassInfo::new("Base", None));
        let sub = reg.define_klass(KlassInfo::new("Sub", Some(base)));
        let m = virtual_method(&reg, base);
        assert_eq!(reg.resolve_invoke(sub, m), Some(m));
        let over = virtual_method(&reg, sub);
        assert_eq!(reg.resolve_invoke(sub, m), Some(over));
        assert!(reg.is_subclass_of(sub, base));
        assert!(!reg.is_subclass_of(base, sub));
        assert_eq!(reg.klass(base).map(|k| k.is_leaf), Some(false));
    }

    #[test]
    fn test_unique_concrete_method() {
        let reg = MethodRegistry::new();
        let base = reg.define_klass(KlassInfo::new("Base", None));
        let m = virtual_method(&reg, base);
        assert_eq!(reg.unique_concrete_method(base, m), Some(m));
        let sub = reg.define_klass(KlassInfo::new("Sub", Some(base)));
        virtual_method(&reg, sub);
        assert_eq!(reg.unique_concrete_method(base, m), None);
    }

    #[test]
    fn test_call_site_and_traps() {
        let reg = MethodRegistry::new();
        let k = reg.define_klass(KlassInfo::new("K", None));
        let caller = virtual_method(&reg, k);
        let callee = virtual_method(&reg, k);
        reg.set_call_site(
            caller,
            3,
            CallSiteInfo {
                callee,
                declared_signature: None,
                profile: Default::default(),
            },
        );
        reg.record_traps(caller, 3, DeoptReason::NullCheck, 2);
        assert_eq!(reg.call_site(caller, 3).map(|s| s.callee), Some(callee));
        assert_eq!(
            reg.method(caller).map(|m| m.trap_count(3, DeoptReason::NullCheck)),
            Some(2)
        );
    }
}
