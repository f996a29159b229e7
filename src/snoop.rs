//! Snoop targets: other drivers' vectors this driver follows.
//!
//! A driver registers a shadow vector shaped like the one it wants to watch.
//! Registration asks the hub to route that vector's traffic here; incoming
//! definitions and updates are then matched by device and name and applied to
//! the shadow, which the driver reads like any local vector.

use tracing::{debug, warn};

use crate::driver::DriverIo;
use crate::error::AppResult;
use crate::property::PropertyVector;
use crate::wire::{apply_snoop, Element, SnoopOutcome};

/// Shadow vectors kept in step with other drivers.
#[derive(Debug, Default)]
pub struct SnoopRegistry {
    targets: Vec<PropertyVector>,
}

impl SnoopRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow `shadow`'s device and name, and ask the hub for its traffic.
    pub fn register(&mut self, io: &DriverIo, shadow: PropertyVector) -> AppResult<()> {
        io.get_properties(Some(shadow.device()), Some(shadow.name()))?;
        self.register_local(shadow);
        Ok(())
    }

    /// Follow `shadow` without contacting the hub.
    pub fn register_local(&mut self, shadow: PropertyVector) {
        debug!(device = shadow.device(), name = shadow.name(), "snoop registered");
        self.targets.push(shadow);
    }

    /// Apply a `def*Vector` / `set*Vector` to the first matching target.
    ///
    /// Returns the updated shadow, or `None` if no target matches. Errors mean
    /// a target matched but the message could not be applied; the shadow is
    /// unchanged.
    pub fn dispatch(&mut self, root: &Element) -> AppResult<Option<&PropertyVector>> {
        let mut matched = None;
        for (i, target) in self.targets.iter_mut().enumerate() {
            if target.is_deleted() {
                let redefined = root.name.starts_with("def")
                    && root.attr("device") == Some(target.device())
                    && root.attr("name") == Some(target.name());
                if !redefined {
                    continue;
                }
                // Stays deleted unless the redefinition applies cleanly.
                let mut candidate = target.clone();
                candidate.revive();
                if apply_snoop(root, &mut candidate)? == SnoopOutcome::Updated {
                    *target = candidate;
                    matched = Some(i);
                    break;
                }
                continue;
            }
            if apply_snoop(root, target)? == SnoopOutcome::Updated {
                matched = Some(i);
                break;
            }
        }
        match matched {
            Some(i) => {
                let target = &self.targets[i];
                debug!(device = target.device(), name = target.name(), element = %root.name, "snoop applied");
                Ok(Some(target))
            }
            None => {
                debug!(element = %root.name, device = ?root.attr("device"), name = ?root.attr("name"), "no snoop target");
                Ok(None)
            }
        }
    }

    /// Handle a `delProperty`: mark matching shadows deleted and return their
    /// count. A missing name deletes every shadow of the device.
    pub fn handle_delete(&mut self, root: &Element) -> usize {
        let Some(device) = root.attr("device") else {
            warn!("delProperty without device");
            return 0;
        };
        let name = root.attr("name");
        let mut count = 0;
        for target in self
            .targets
            .iter_mut()
            .filter(|t| t.device() == device && name.map_or(true, |n| n == t.name()))
        {
            target.mark_deleted();
            count += 1;
        }
        if count > 0 {
            debug!(device, ?name, count, "snooped vectors deleted");
        }
        count
    }

    /// Shadow for `device` / `name`.
    pub fn get(&self, device: &str, name: &str) -> Option<&PropertyVector> {
        self.targets
            .iter()
            .find(|t| t.device() == device && t.name() == name)
    }

    /// All shadows, in registration order.
    pub fn targets(&self) -> &[PropertyVector] {
        &self.targets
    }
}
