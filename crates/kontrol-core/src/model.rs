//! The model facade
//!
//! [`KontrolModel`] owns the rack hierarchy and is the single mutation
//! entry point for both local callers and the network receiver. It is
//! an explicitly owned instance shared as `Arc<KontrolModel>`; there is
//! no process-wide singleton. Mutations are serialized by an internal
//! lock and fanned out to registered [`ModelCallback`] listeners after
//! the lock is released, so a listener may query the model re-entrantly.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    ChangeSource, EntityId, KontrolError, KontrolResult, ModelCallback, Module, Page, ParamValue,
    Parameter, Rack,
};

#[derive(Default)]
struct ModelState {
    racks: BTreeMap<EntityId, Rack>,
}

/// Hierarchical model of racks, modules, pages, and parameters.
pub struct KontrolModel {
    local_rack_id: EntityId,
    state: RwLock<ModelState>,
    listeners: RwLock<Vec<Arc<dyn ModelCallback>>>,
}

impl KontrolModel {
    /// Creates the model with this node's own rack already present.
    pub fn new(local_host: impl Into<String>, local_port: u16) -> Self {
        let local = Rack::new(local_host, local_port);
        let local_rack_id = local.id().clone();
        let mut racks = BTreeMap::new();
        racks.insert(local_rack_id.clone(), local);

        KontrolModel {
            local_rack_id,
            state: RwLock::new(ModelState { racks }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_callback(&self, listener: Arc<dyn ModelCallback>) {
        self.listeners.write().push(listener);
    }

    pub fn local_rack_id(&self) -> &EntityId {
        &self.local_rack_id
    }

    /// Snapshot of all known racks.
    pub fn racks(&self) -> Vec<Rack> {
        self.state.read().racks.values().cloned().collect()
    }

    /// Snapshot of a single rack.
    pub fn rack(&self, id: &EntityId) -> Option<Rack> {
        self.state.read().racks.get(id).cloned()
    }

    fn listeners(&self) -> Vec<Arc<dyn ModelCallback>> {
        self.listeners.read().clone()
    }

    /// Creates or refreshes a rack descriptor.
    pub fn create_rack(
        &self,
        src: ChangeSource,
        rack_id: EntityId,
        host: &str,
        port: u16,
    ) -> KontrolResult<()> {
        let rack = {
            let mut state = self.state.write();
            state
                .racks
                .entry(rack_id.clone())
                .or_insert_with(|| Rack::new(host, port))
                .clone()
        };
        for l in self.listeners() {
            l.rack(src, &rack);
        }
        Ok(())
    }

    pub fn create_module(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: EntityId,
        display_name: &str,
        module_type: &str,
    ) -> KontrolResult<()> {
        let (rack, module) = {
            let mut state = self.state.write();
            let rack = state
                .racks
                .get_mut(rack_id)
                .ok_or_else(|| KontrolError::RackNotFound(rack_id.clone()))?;
            let module = rack
                .insert_module(Module::new(module_id, display_name, module_type))
                .clone();
            (rack.clone(), module)
        };
        for l in self.listeners() {
            l.module(src, &rack, &module);
        }
        Ok(())
    }

    /// Creates a parameter from its wire creation-argument list.
    pub fn create_param(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: &EntityId,
        args: Vec<ParamValue>,
    ) -> KontrolResult<()> {
        let param = Parameter::from_args(args)?;
        let (rack, module, param) = {
            let mut state = self.state.write();
            let rack = state
                .racks
                .get_mut(rack_id)
                .ok_or_else(|| KontrolError::RackNotFound(rack_id.clone()))?;
            let module = rack.module_mut(module_id)?;
            let param = module.insert_param(param).clone();
            let module = module.clone();
            (rack.clone(), module, param)
        };
        for l in self.listeners() {
            l.param(src, &rack, &module, &param);
        }
        Ok(())
    }

    pub fn create_page(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: &EntityId,
        page_id: EntityId,
        display_name: &str,
        param_ids: Vec<EntityId>,
    ) -> KontrolResult<()> {
        let (rack, module, page) = {
            let mut state = self.state.write();
            let rack = state
                .racks
                .get_mut(rack_id)
                .ok_or_else(|| KontrolError::RackNotFound(rack_id.clone()))?;
            let module = rack.module_mut(module_id)?;
            let page = module
                .insert_page(Page::new(page_id, display_name, param_ids))
                .clone();
            let module = module.clone();
            (rack.clone(), module, page)
        };
        for l in self.listeners() {
            l.page(src, &rack, &module, &page);
        }
        Ok(())
    }

    pub fn change_param(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: &EntityId,
        param_id: &EntityId,
        value: ParamValue,
    ) -> KontrolResult<()> {
        let (rack, module, param) = {
            let mut state = self.state.write();
            let rack = state
                .racks
                .get_mut(rack_id)
                .ok_or_else(|| KontrolError::RackNotFound(rack_id.clone()))?;
            let module = rack.module_mut(module_id)?;
            let param = module.param_mut(param_id)?;
            param.set_current(value);
            let param = param.clone();
            let module = module.clone();
            (rack.clone(), module, param)
        };
        for l in self.listeners() {
            l.changed(src, &rack, &module, &param);
        }
        Ok(())
    }

    pub fn resource(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        res_type: &str,
        name: &str,
    ) -> KontrolResult<()> {
        let rack = {
            let mut state = self.state.write();
            let rack = state
                .racks
                .get_mut(rack_id)
                .ok_or_else(|| KontrolError::RackNotFound(rack_id.clone()))?;
            rack.add_resource(res_type, name);
            rack.clone()
        };
        for l in self.listeners() {
            l.resource(src, &rack, res_type, name);
        }
        Ok(())
    }

    /// Removes a rack and everything it owns.
    ///
    /// Liveness timeout never calls this; a silent peer merely goes
    /// inactive and keeps its entry.
    pub fn delete_rack(&self, src: ChangeSource, rack_id: &EntityId) -> KontrolResult<()> {
        let rack = self
            .state
            .write()
            .racks
            .remove(rack_id)
            .ok_or_else(|| KontrolError::RackNotFound(rack_id.clone()))?;
        for l in self.listeners() {
            l.delete_rack(src, &rack);
        }
        Ok(())
    }

    pub fn assign_midi_cc(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: &EntityId,
        param_id: &EntityId,
        cc: u32,
    ) -> KontrolResult<()> {
        self.change_midi_cc(src, rack_id, module_id, param_id, cc, true)
    }

    pub fn unassign_midi_cc(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: &EntityId,
        param_id: &EntityId,
        cc: u32,
    ) -> KontrolResult<()> {
        self.change_midi_cc(src, rack_id, module_id, param_id, cc, false)
    }

    fn change_midi_cc(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: &EntityId,
        param_id: &EntityId,
        cc: u32,
        assign: bool,
    ) -> KontrolResult<()> {
        let (rack, module, param) = {
            let mut state = self.state.write();
            let rack = state
                .racks
                .get_mut(rack_id)
                .ok_or_else(|| KontrolError::RackNotFound(rack_id.clone()))?;
            let module = rack.module_mut(module_id)?;
            let param = module.param_mut(param_id)?.clone();
            if assign {
                module.assign_midi_cc(cc, param_id);
            } else {
                module.unassign_midi_cc(cc, param_id);
            }
            let module = module.clone();
            (rack.clone(), module, param)
        };
        for l in self.listeners() {
            if assign {
                l.assign_midi_cc(src, &rack, &module, &param, cc);
            } else {
                l.unassign_midi_cc(src, &rack, &module, &param, cc);
            }
        }
        Ok(())
    }

    pub fn update_preset(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        preset: &str,
    ) -> KontrolResult<()> {
        let rack = self.rack_snapshot(rack_id)?;
        for l in self.listeners() {
            l.update_preset(src, &rack, preset);
        }
        Ok(())
    }

    pub fn apply_preset(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        preset: &str,
    ) -> KontrolResult<()> {
        let rack = self.rack_snapshot(rack_id)?;
        for l in self.listeners() {
            l.apply_preset(src, &rack, preset);
        }
        Ok(())
    }

    pub fn save_settings(&self, src: ChangeSource, rack_id: &EntityId) -> KontrolResult<()> {
        let rack = self.rack_snapshot(rack_id)?;
        for l in self.listeners() {
            l.save_settings(src, &rack);
        }
        Ok(())
    }

    /// Requests instantiation of a module; the rack that owns the id
    /// reacts, this layer only relays the request.
    pub fn load_module(
        &self,
        src: ChangeSource,
        rack_id: &EntityId,
        module_id: &EntityId,
        module_type: &str,
    ) -> KontrolResult<()> {
        let rack = self.rack_snapshot(rack_id)?;
        for l in self.listeners() {
            l.load_module(src, &rack, module_id, module_type);
        }
        Ok(())
    }

    /// Peer heartbeat. Creates the rack on first ping, then forwards
    /// the ping to all listeners.
    pub fn ping(&self, src: ChangeSource, host: &str, port: u16, keep_alive: u32) {
        let created = {
            let mut state = self.state.write();
            let rack_id = EntityId::for_rack(host, port);
            if state.racks.contains_key(&rack_id) {
                None
            } else {
                debug!(rack = %rack_id, "rack created on first ping");
                let rack = Rack::new(host, port);
                state.racks.insert(rack_id, rack.clone());
                Some(rack)
            }
        };
        let listeners = self.listeners();
        if let Some(rack) = created {
            for l in &listeners {
                l.rack(src, &rack);
            }
        }
        for l in &listeners {
            l.ping(src, host, port, keep_alive);
        }
    }

    /// Replays the local rack's full contents to all listeners, tagged
    /// as a local change: rack, modules, then per module its params,
    /// pages, current values, and MIDI-CC mappings.
    pub fn publish_meta_data(&self) {
        let Some(rack) = self.rack(&self.local_rack_id) else {
            return;
        };
        let src = ChangeSource::Local;
        let listeners = self.listeners();
        for l in &listeners {
            l.rack(src, &rack);
        }
        for module in rack.modules() {
            for l in &listeners {
                l.module(src, &rack, module);
            }
            for param in module.params() {
                for l in &listeners {
                    l.param(src, &rack, module, param);
                }
            }
            for page in module.pages() {
                for l in &listeners {
                    l.page(src, &rack, module, page);
                }
            }
            for param in module.params() {
                for l in &listeners {
                    l.changed(src, &rack, module, param);
                }
            }
            for (cc, param_ids) in module.midi_mapping() {
                for param_id in param_ids {
                    if let Some(param) = module.param(param_id) {
                        for l in &listeners {
                            l.assign_midi_cc(src, &rack, module, param, cc);
                        }
                    }
                }
            }
        }
    }

    fn rack_snapshot(&self, rack_id: &EntityId) -> KontrolResult<Rack> {
        self.rack(rack_id)
            .ok_or_else(|| KontrolError::RackNotFound(rack_id.clone()))
    }
}
