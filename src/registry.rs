use rhai::FnPtr;
use thiserror::Error;

/// Opaque, non-zero handle into the callback registry. Encodes a slot index
/// and a generation so a released slot can never be resurrected by a stale
/// value held on the script side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u64);

impl CallbackHandle {
    fn new(index: usize, generation: u32) -> Self {
        CallbackHandle(((generation as u64) << 32) | (index as u64 + 1))
    }

    /// Script-space values come in as raw integers; zero means "no callback".
    pub fn from_raw(raw: u64) -> Option<Self> {
        if raw & 0xffff_ffff == 0 {
            None
        } else {
            Some(CallbackHandle(raw))
        }
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & 0xffff_ffff) as usize - 1
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("callable '{0}' does not resolve to a script function")]
    NotScriptFunction(String),
    #[error("no script is loaded, cannot register callbacks")]
    NoScript,
}

struct Slot {
    generation: u32,
    callable: Option<FnPtr>,
}

/// Owns script-side callables between register and release. Nothing else in
/// the bridge may keep a strong reference to a registered callable; bindings
/// refer to slots through [`CallbackHandle`] only.
#[derive(Default)]
pub struct CallbackRegistry {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callable: FnPtr) -> CallbackHandle {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.callable = Some(callable);
                CallbackHandle::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len();
                self.slots.push(Slot { generation: 0, callable: Some(callable) });
                CallbackHandle::new(index, 0)
            }
        }
    }

    pub fn get(&self, handle: CallbackHandle) -> Option<&FnPtr> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.callable.as_ref()
    }

    /// Idempotent: releasing a stale or already-released handle is a no-op,
    /// since object death races harmlessly against in-flight events.
    pub fn release(&mut self, handle: CallbackHandle) {
        let index = handle.index();
        let Some(slot) = self.slots.get_mut(index) else {
            return;
        };
        if slot.generation != handle.generation() || slot.callable.is_none() {
            return;
        }
        slot.callable = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.callable.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
