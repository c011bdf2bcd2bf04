use crate::error::{EngineError, Result};
use corral_dsa::SlotId;
use std::any::Any;
use std::fmt;

/// What a registry is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Server,
    Connection(SlotId),
}

type Destructor = Box<dyn FnOnce(Box<dyn Any + Send>) + Send>;

/// One named extension slot.
pub struct Attachment {
    name: String,
    value: Box<dyn Any + Send>,
    size_hint: usize,
    destructor: Option<Destructor>,
    owner: Owner,
}

impl Attachment {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `size_of` the attached value's type.
    pub fn size_hint(&self) -> usize {
        self.size_hint
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn has_destructor(&self) -> bool {
        self.destructor.is_some()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut()
    }

    fn release(self) {
        if let Some(destructor) = self.destructor {
            destructor(self.value);
        }
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("size_hint", &self.size_hint)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Named, type-checked state that layered protocols hang off a server or a
/// connection without the engine knowing what it is.
///
/// ## Collisions
/// Attaching a name that is already present is rejected with
/// [`EngineError::AttachmentExists`]; the existing entry is untouched.
///
/// ## Ordering
/// Lookups and iteration see the most recently attached entry first.
/// Dropping the registry detaches everything in that order, running each
/// destructor before its value is released.
pub struct Attachments {
    owner: Owner,
    // Newest last.
    entries: Vec<Attachment>,
}

impl Attachments {
    pub fn new(owner: Owner) -> Self {
        Self {
            owner,
            entries: Vec::new(),
        }
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attaches `value` under `name` with no destructor.
    pub fn attach<T: Any + Send>(&mut self, name: impl Into<String>, value: T) -> Result<()> {
        self.insert(name.into(), Box::new(value), std::mem::size_of::<T>(), None)
    }

    /// Attaches `value` under `name`; `destructor` receives the value when
    /// it is detached or its owner is destroyed.
    pub fn attach_with<T, D>(&mut self, name: impl Into<String>, value: T, destructor: D) -> Result<()>
    where
        T: Any + Send,
        D: FnOnce(T) + Send + 'static,
    {
        let destructor: Destructor = Box::new(move |value: Box<dyn Any + Send>| {
            if let Ok(value) = value.downcast::<T>() {
                destructor(*value);
            }
        });
        self.insert(
            name.into(),
            Box::new(value),
            std::mem::size_of::<T>(),
            Some(destructor),
        )
    }

    fn insert(
        &mut self,
        name: String,
        value: Box<dyn Any + Send>,
        size_hint: usize,
        destructor: Option<Destructor>,
    ) -> Result<()> {
        if self.contains(&name) {
            tracing::warn!("Attachments: `{}` already attached to {:?}", name, self.owner);
            return Err(EngineError::AttachmentExists(name));
        }
        self.entries.push(Attachment {
            name,
            value,
            size_hint,
            destructor,
            owner: self.owner,
        });
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().rposition(|entry| entry.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Attachment> {
        self.position(name).map(|i| &self.entries[i])
    }

    /// The value under `name`, if present and of type `T`.
    pub fn find<T: Any>(&self, name: &str) -> Option<&T> {
        self.get(name)?.downcast_ref()
    }

    pub fn find_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        let i = self.position(name)?;
        self.entries[i].downcast_mut()
    }

    /// Unlinks `name`, running its destructor.
    pub fn detach(&mut self, name: &str) -> Result<()> {
        let i = self
            .position(name)
            .ok_or_else(|| EngineError::AttachmentMissing(name.to_string()))?;
        let entry = self.entries.remove(i);
        tracing::debug!("Attachments: detached `{}` from {:?}", entry.name, self.owner);
        entry.release();
        Ok(())
    }

    /// Names, most recently attached first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().rev().map(|entry| entry.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attachment> {
        self.entries.iter().rev()
    }

    /// Detaches every entry, newest first.
    pub fn clear(&mut self) {
        while let Some(entry) = self.entries.pop() {
            entry.release();
        }
    }
}

impl Drop for Attachments {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for Attachments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachments")
            .field("owner", &self.owner)
            .field("names", &self.names().collect::<Vec<_>>())
            .finish()
    }
}
