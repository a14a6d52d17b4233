//! Model event listener trait

use crate::{ChangeSource, EntityId, Module, Page, Parameter, Rack};

/// Listener for model mutations.
///
/// Every mutation on [`crate::KontrolModel`] is fanned out to the
/// registered callbacks, tagged with the [`ChangeSource`] of whatever
/// triggered it. All methods default to no-ops so a listener only
/// implements the events it cares about.
#[allow(unused_variables)]
pub trait ModelCallback: Send + Sync {
    fn rack(&self, src: ChangeSource, rack: &Rack) {}

    fn module(&self, src: ChangeSource, rack: &Rack, module: &Module) {}

    fn page(&self, src: ChangeSource, rack: &Rack, module: &Module, page: &Page) {}

    fn param(&self, src: ChangeSource, rack: &Rack, module: &Module, param: &Parameter) {}

    /// Current-value update for an existing parameter.
    fn changed(&self, src: ChangeSource, rack: &Rack, module: &Module, param: &Parameter) {}

    fn resource(&self, src: ChangeSource, rack: &Rack, res_type: &str, name: &str) {}

    fn delete_rack(&self, src: ChangeSource, rack: &Rack) {}

    fn assign_midi_cc(
        &self,
        src: ChangeSource,
        rack: &Rack,
        module: &Module,
        param: &Parameter,
        cc: u32,
    ) {
    }

    fn unassign_midi_cc(
        &self,
        src: ChangeSource,
        rack: &Rack,
        module: &Module,
        param: &Parameter,
        cc: u32,
    ) {
    }

    fn update_preset(&self, src: ChangeSource, rack: &Rack, preset: &str) {}

    fn apply_preset(&self, src: ChangeSource, rack: &Rack, preset: &str) {}

    fn save_settings(&self, src: ChangeSource, rack: &Rack) {}

    fn load_module(
        &self,
        src: ChangeSource,
        rack: &Rack,
        module_id: &EntityId,
        module_type: &str,
    ) {
    }

    /// Peer liveness heartbeat, forwarded from the receiver.
    fn ping(&self, src: ChangeSource, host: &str, port: u16, keep_alive: u32) {}
}
