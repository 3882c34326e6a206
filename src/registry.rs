//! The render-target registry.
//!
//! Clients deal in stable integer indices rather than raw surface handles
//! because the underlying native surface may be reallocated by its owner
//! (swap-chain rotation and the like). The registry keeps the integer
//! contract consistent regardless of churn underneath: an index round-trips
//! to the same entry until it is explicitly removed, and freed indices are
//! reissued smallest-first so index growth stays bounded.

use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use crate::context::RenderSurface;
use crate::error::{EncodeError, RegisterError, TargetError};

/// Maximum number of simultaneously registered render targets per session.
pub const MAX_RENDER_TARGETS: usize = 64;

/// Observable state of a registered render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTargetState {
    /// Registered and usable.
    Registered,
    /// Used by the most recent successful encode call.
    Active,
    /// The underlying surface became unusable; re-register after fixing it.
    Invalid,
}

/// What an entry captures from.
pub(crate) enum TargetKind {
    /// The session's desktop source.
    Desktop { display: u32 },
    /// A client-owned surface, referenced without ownership.
    Surface(Weak<dyn RenderSurface>),
}

pub(crate) struct TargetEntry {
    kind: TargetKind,
    width: u32,
    height: u32,
    state: RenderTargetState,
}

/// Resolved capture source for one encode call.
pub(crate) enum ResolvedTarget {
    Desktop { display: u32 },
    Surface(Arc<dyn RenderSurface>),
}

/// Slot-based registry; `None` slots are free indices awaiting reuse.
#[derive(Default)]
pub(crate) struct TargetRegistry {
    slots: Vec<Option<TargetEntry>>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn registered_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn allocate(&mut self, entry: TargetEntry) -> usize {
        // Smallest unused index first.
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(entry);
                return index;
            }
        }
        self.slots.push(Some(entry));
        self.slots.len() - 1
    }

    /// Register the implicit desktop target of a desktop-source session.
    pub fn register_desktop(&mut self, display: u32, width: u32, height: u32) -> usize {
        let index = self.allocate(TargetEntry {
            kind: TargetKind::Desktop { display },
            width,
            height,
            state: RenderTargetState::Registered,
        });
        let disp = display;
        debug!(index, display = disp, width, height, "desktop target registered");
        index
    }

    /// Register a client surface.
    pub fn register_surface(
        &mut self,
        surface: &Arc<dyn RenderSurface>,
        width: u32,
        height: u32,
    ) -> Result<usize, RegisterError> {
        if width == 0 || height == 0 {
            return Err(RegisterError::InvalidDimensions { width, height });
        }
        if self.registered_count() >= MAX_RENDER_TARGETS {
            return Err(RegisterError::ResourceLimit {
                max: MAX_RENDER_TARGETS,
            });
        }

        let index = self.allocate(TargetEntry {
            kind: TargetKind::Surface(Arc::downgrade(surface)),
            width,
            height,
            state: RenderTargetState::Registered,
        });
        debug!(index, width, height, "render target registered");
        Ok(index)
    }

    /// Remove an entry and free its index for reuse.
    pub fn remove(&mut self, index: usize) -> Result<(), TargetError> {
        match self.slots.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                debug!(index, "render target removed");
                Ok(())
            }
            _ => Err(TargetError::InvalidIndex(index)),
        }
    }

    /// State of a registered entry.
    pub fn state(&self, index: usize) -> Result<RenderTargetState, TargetError> {
        match self.slots.get(index) {
            Some(Some(entry)) => Ok(entry.state),
            _ => Err(TargetError::InvalidIndex(index)),
        }
    }

    /// Resolve an entry for an encode call, performing the lazy validity
    /// check: a dropped or resized surface flips the entry to `Invalid`.
    pub fn resolve_for_encode(&mut self, index: usize) -> Result<ResolvedTarget, EncodeError> {
        let entry = match self.slots.get_mut(index) {
            Some(Some(entry)) => entry,
            _ => return Err(EncodeError::InvalidIndex(index)),
        };

        if entry.state == RenderTargetState::Invalid {
            return Err(EncodeError::TargetInvalid(index));
        }

        match &entry.kind {
            TargetKind::Desktop { display } => Ok(ResolvedTarget::Desktop { display: *display }),
            TargetKind::Surface(weak) => match weak.upgrade() {
                Some(surface) => {
                    if surface.dimensions() != (entry.width, entry.height) {
                        trace!(index, "surface dimensions changed, invalidating target");
                        entry.state = RenderTargetState::Invalid;
                        return Err(EncodeError::TargetInvalid(index));
                    }
                    Ok(ResolvedTarget::Surface(surface))
                }
                None => {
                    trace!(index, "surface dropped by owner, invalidating target");
                    entry.state = RenderTargetState::Invalid;
                    Err(EncodeError::TargetInvalid(index))
                }
            },
        }
    }

    /// Mark `index` as the entry used by the most recent successful encode,
    /// demoting the previous `Active` entry back to `Registered`.
    pub fn mark_active(&mut self, index: usize) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Some(entry) = slot {
                if i == index {
                    entry.state = RenderTargetState::Active;
                } else if entry.state == RenderTargetState::Active {
                    entry.state = RenderTargetState::Registered;
                }
            }
        }
    }

    /// Drop all entries (session teardown).
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
