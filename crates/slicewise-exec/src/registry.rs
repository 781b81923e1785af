//! Explicit worker registration.
//!
//! Ids are handed out densely from zero in registration order, so they double
//! as indices into per-worker vectors.

use slicewise_core::id::WorkerId;

#[derive(Debug, Default, Clone)]
pub struct WorkerRegistry {
    names: Vec<String>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n` workers named `{prefix}-{index}`.
    pub fn with_workers(prefix: &str, n: usize) -> Self {
        let mut reg = Self::new();
        for i in 0..n {
            reg.register(format!("{prefix}-{i}"));
        }
        reg
    }

    pub fn register(&mut self, name: impl Into<String>) -> WorkerId {
        let id = WorkerId::new(self.names.len() as u64);
        self.names.push(name.into());
        id
    }

    pub fn name(&self, worker: WorkerId) -> Option<&str> {
        self.names.get(worker.index()).map(String::as_str)
    }

    pub fn workers(&self) -> impl Iterator<Item = WorkerId> + '_ {
        (0..self.names.len() as u64).map(WorkerId::new)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_ordered() {
        let mut reg = WorkerRegistry::new();
        let a = reg.register("a");
        let b = reg.register("b");
        assert_eq!((a.index(), b.index()), (0, 1));
        assert_eq!(reg.name(b), Some("b"));
        assert_eq!(reg.name(WorkerId::new(7)), None);

        let reg = WorkerRegistry::with_workers("w", 3);
        let ids: Vec<u64> = reg.workers().map(WorkerId::get).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(reg.name(WorkerId::new(2)), Some("w-2"));
    }
}
