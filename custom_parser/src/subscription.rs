use std::sync::Arc;

use ahash::AHashMap as HashMap;
use log::{debug, trace};

use crate::{
    common::Vector, entity::PropertyValue, error::Result, serverclass::ServerClass,
    state::GameState, ParserError,
};

/// Called once per entity instance right after it is constructed.
pub type CreatedHandler = fn(&mut BindingContext<'_>) -> Result<()>;

/// Called for every decoded value of one property of one entity.
pub type UpdateHandler =
    Arc<dyn Fn(&mut BindingContext<'_>, &PropertyUpdate<'_>) -> Result<()> + Send + Sync>;

/// Observer registry: creation handlers per server class, update handlers
/// per `(entity id, property index)`.
#[derive(Default)]
pub struct Subscriptions {
    created: HashMap<usize, Vec<CreatedHandler>>,
    updates: HashMap<i32, HashMap<usize, Vec<UpdateHandler>>>,
}

impl Subscriptions {
    pub fn on_created(&mut self, class_index: usize, handler: CreatedHandler) {
        self.created.entry(class_index).or_default().push(handler);
    }

    pub fn on_update(&mut self, entity_id: i32, prop_index: usize, handler: UpdateHandler) {
        self.updates
            .entry(entity_id)
            .or_default()
            .entry(prop_index)
            .or_default()
            .push(handler);
    }

    /// Drops every update handler registered for an entity.
    pub fn clear_entity(&mut self, entity_id: i32) {
        self.updates.remove(&entity_id);
    }

    pub fn created_count(&self, class_index: usize) -> usize {
        self.created.get(&class_index).map_or(0, Vec::len)
    }

    pub fn update_count(&self, entity_id: i32, prop_index: usize) -> usize {
        self.updates
            .get(&entity_id)
            .and_then(|props| props.get(&prop_index))
            .map_or(0, Vec::len)
    }

    fn created_handlers(&self, class_index: usize) -> Vec<CreatedHandler> {
        self.created.get(&class_index).cloned().unwrap_or_default()
    }

    fn update_handlers(&self, entity_id: i32, prop_index: usize) -> Vec<UpdateHandler> {
        self.updates
            .get(&entity_id)
            .and_then(|props| props.get(&prop_index))
            .cloned()
            .unwrap_or_default()
    }
}

/// A decoded property value on its way to the subscribed handlers.
#[derive(Debug, Clone, Copy)]
pub struct PropertyUpdate<'a> {
    pub entity_id: i32,
    pub prop_index: usize,
    pub name: &'a str,
    pub value: &'a PropertyValue,
}

impl PropertyUpdate<'_> {
    pub fn int(&self) -> Result<i32> {
        self.value.as_integer().ok_or_else(|| self.mismatch("integer"))
    }

    pub fn float(&self) -> Result<f64> {
        self.value.as_float().ok_or_else(|| self.mismatch("float"))
    }

    pub fn vector(&self) -> Result<Vector> {
        self.value.as_vector().ok_or_else(|| self.mismatch("vector"))
    }

    pub fn string(&self) -> Result<&str> {
        self.value.as_str().ok_or_else(|| self.mismatch("string"))
    }

    fn mismatch(&self, expected: &'static str) -> ParserError {
        ParserError::PropertyTypeMismatch {
            name: self.name.to_string(),
            expected,
            got: format!("{:?}", self.value),
        }
    }
}

/// Everything a handler may touch: the game state, the registry (to add
/// further subscriptions) and the entity it is scoped to.
pub struct BindingContext<'a> {
    pub state: &'a mut GameState,
    subscriptions: &'a mut Subscriptions,
    pub class: &'a ServerClass,
    pub class_index: usize,
    pub entity_id: i32,
}

impl<'a> BindingContext<'a> {
    pub fn new(
        state: &'a mut GameState,
        subscriptions: &'a mut Subscriptions,
        class: &'a ServerClass,
        class_index: usize,
        entity_id: i32,
    ) -> Self {
        Self {
            state,
            subscriptions,
            class,
            class_index,
            entity_id,
        }
    }

    /// Whether the entity's class declares a property with this path.
    pub fn declares(&self, prop: &str) -> bool {
        self.class.property_index(prop).is_some()
    }

    /// Subscribes to a property of the current entity. Paths the class does
    /// not declare are ignored, protocol versions differ in what they send.
    pub fn on_update<F>(&mut self, prop: &str, handler: F)
    where
        F: Fn(&mut BindingContext<'_>, &PropertyUpdate<'_>) -> Result<()> + Send + Sync + 'static,
    {
        match self.class.property_index(prop) {
            Some(idx) => self
                .subscriptions
                .on_update(self.entity_id, idx, Arc::new(handler)),
            None => debug!("{} has no property {prop}", self.class.name),
        }
    }

    pub fn fire_created(&mut self) -> Result<()> {
        for handler in self.subscriptions.created_handlers(self.class_index) {
            handler(&mut *self)?;
        }
        Ok(())
    }

    /// Runs the handlers registered for one property. Handlers added while
    /// dispatching only see later values.
    pub fn dispatch(&mut self, prop_index: usize, value: &PropertyValue) -> Result<()> {
        let handlers = self.subscriptions.update_handlers(self.entity_id, prop_index);
        if handlers.is_empty() {
            return Ok(());
        }

        let class = self.class;
        let update = PropertyUpdate {
            entity_id: self.entity_id,
            prop_index,
            name: class
                .flattened_props
                .get(prop_index)
                .map_or("", |fp| fp.name.as_str()),
            value,
        };
        trace!(
            "entity {} {} = {:?}",
            self.entity_id,
            update.name,
            update.value
        );

        for handler in handlers {
            handler(&mut *self, &update)?;
        }
        Ok(())
    }
}
