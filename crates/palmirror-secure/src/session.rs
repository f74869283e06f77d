use std::sync::{Arc, RwLock};

use crate::crypto::DerivedKey;

/// Process-wide slot for the unlocked vault key.
///
/// Readers get an `Arc` snapshot, so a concurrent [`clear`](Self::clear) never
/// invalidates a key an in-flight operation is already using. The key bytes are
/// zeroized once the last snapshot is dropped.
///
/// A poisoned lock is recovered rather than propagated: the slot only ever
/// holds a whole `Option`, so there is no torn state to protect.
#[derive(Debug, Default)]
pub struct SessionKeyHolder {
    slot: RwLock<Option<Arc<DerivedKey>>>,
}

impl SessionKeyHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: DerivedKey) {
        let mut slot = self.slot.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(key));
    }

    pub fn get(&self) -> Option<Arc<DerivedKey>> {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.take().is_some() {
            log::debug!("session key cleared");
        }
    }

    pub fn is_set(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::crypto::KEY_LEN;

    #[test]
    fn set_get_clear() {
        let holder = SessionKeyHolder::new();
        assert!(!holder.is_set());
        assert!(holder.get().is_none());

        holder.set(DerivedKey::from_bytes([1; KEY_LEN]));
        assert!(holder.is_set());
        assert_eq!(holder.get().expect("key").as_bytes(), &[1; KEY_LEN]);

        holder.set(DerivedKey::from_bytes([2; KEY_LEN]));
        assert_eq!(holder.get().expect("key").as_bytes(), &[2; KEY_LEN]);

        holder.clear();
        holder.clear();
        assert!(!holder.is_set());
    }

    #[test]
    fn snapshot_outlives_clear() {
        let holder = SessionKeyHolder::new();
        holder.set(DerivedKey::from_bytes([7; KEY_LEN]));
        let snapshot = holder.get().expect("key");
        holder.clear();
        assert_eq!(snapshot.as_bytes(), &[7; KEY_LEN]);
    }

    #[test]
    fn survives_a_poisoned_lock() {
        let holder = Arc::new(SessionKeyHolder::new());
        holder.set(DerivedKey::from_bytes([3; KEY_LEN]));

        let poisoner = Arc::clone(&holder);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.slot.write().expect("lock");
            panic!("poison the session lock");
        })
        .join();

        assert!(holder.is_set());
        holder.clear();
        assert!(holder.get().is_none());
    }
}
