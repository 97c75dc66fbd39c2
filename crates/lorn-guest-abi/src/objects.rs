use std::any::Any;
use std::rc::Rc;

use crate::error::AbiError;

/// A shared handle to an arbitrary host value the guest cannot represent.
///
/// Cloning shares the underlying value; guest execution is single-threaded, so
/// a plain `Rc` is enough.
#[derive(Clone)]
pub struct HostObject(Rc<dyn Any>);

impl HostObject {
    pub fn new<T: Any>(value: T) -> Self {
        HostObject(Rc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// True when both handles refer to the same underlying host value.
    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for HostObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostObject({:p})", Rc::as_ptr(&self.0))
    }
}

/// Append-only table of host objects referenced from guest memory by handle.
///
/// Handles are issued densely from 0 and never reused within a run. The same
/// host value registered twice gets two handles; nothing is deduplicated or
/// collected.
#[derive(Debug, Default)]
pub struct ObjectTable {
    entries: Vec<HostObject>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, object: HostObject) -> u64 {
        let handle = self.entries.len() as u64;
        self.entries.push(object);
        handle
    }

    pub fn resolve(&self, handle: u64) -> Result<&HostObject, AbiError> {
        usize::try_from(handle)
            .ok()
            .and_then(|idx| self.entries.get(idx))
            .ok_or(AbiError::UnboundHandle(handle))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
