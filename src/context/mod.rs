//! Binding message types to topics.
//!
//! A `BusContext` is an explicit registration table: each message type is
//! registered once with a `TopicBinding`, and the context hands out the
//! matching `TopicSet` on request.
//!
//! ```text
//! ContextBuilder::new(bus)
//!     .register::<OrderCreated>(TopicBinding::new("orders.created")?)
//!     .register::<TenantEvent>(TopicBinding::new("tenant.@.events")?)
//!     .build()?            // eager: orders.created is observed here
//!
//! ctx.set::<OrderCreated>()                       -> cached set
//! ctx.set_with_override::<TenantEvent>("acme")    -> tenant.acme.events
//! ```

use std::any::{self, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::bus::MessageBus;
use crate::error::BindingError;
use crate::message::TopicMessage;
use crate::serializer::{JsonSerializer, Serializer};
use crate::topic::TopicSet;

/// Marker replaced by the override value when a binding is resolved.
pub const PLACEHOLDER: char = '@';

const WILDCARD: char = '*';

/// Topic metadata for one message type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBinding {
    template: String,
    consumer_group: Option<String>,
    allow_wildcards: bool,
}

impl TopicBinding {
    /// A binding for `template`, whose `@` placeholders are
    /// filled in by [`BusContext::set_with_override`].
    pub fn new(template: impl Into<String>) -> Result<Self, BindingError> {
        let template = template.into();
        if template.trim().is_empty() {
            return Err(BindingError::InvalidTemplate(template));
        }
        Ok(Self {
            template,
            consumer_group: None,
            allow_wildcards: false,
        })
    }

    /// Consume as `group` instead of the bus default.
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Accept `*` in the resolved topic.
    pub fn allow_wildcards(mut self, allow: bool) -> Self {
        self.allow_wildcards = allow;
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn group(&self) -> Option<&str> {
        self.consumer_group.as_deref()
    }

    pub fn wildcards_allowed(&self) -> bool {
        self.allow_wildcards
    }

    /// Bindings with a placeholder are not initialized by `build`.
    pub fn has_placeholder(&self) -> bool {
        self.template.contains(PLACEHOLDER)
    }

    /// Produce the concrete topic name.
    ///
    /// With an override every `@` in the template is replaced by it;
    /// without one the template is used as written.
    pub fn resolve(&self, override_value: Option<&str>) -> Result<String, BindingError> {
        let topic = match override_value {
            Some(value) => self.template.replace(PLACEHOLDER, value),
            None => self.template.clone(),
        };

        if topic.trim().is_empty() {
            return Err(BindingError::InvalidTemplate(topic));
        }
        if !self.allow_wildcards && topic.contains(WILDCARD) {
            return Err(BindingError::WildcardNotAllowed(topic));
        }
        Ok(topic)
    }
}

type ErasedSet = Box<dyn Any + Send + Sync>;
type BuildFn<S> = fn(&Arc<MessageBus<S>>, &TopicBinding) -> Result<ErasedSet, BindingError>;

struct Registration<S: Serializer> {
    type_name: &'static str,
    binding: TopicBinding,
    build: BuildFn<S>,
}

fn build_erased<T: TopicMessage, S: Serializer>(
    bus: &Arc<MessageBus<S>>,
    binding: &TopicBinding,
) -> Result<ErasedSet, BindingError> {
    let set = construct::<T, S>(bus, binding, None)?;
    Ok(Box::new(set))
}

fn construct<T: TopicMessage, S: Serializer>(
    bus: &Arc<MessageBus<S>>,
    binding: &TopicBinding,
    override_value: Option<&str>,
) -> Result<Arc<TopicSet<T, S>>, BindingError> {
    let topic = binding.resolve(override_value)?;
    let set = TopicSet::new(Arc::clone(bus), &topic, binding.group())?;
    Ok(Arc::new(set))
}

/// Collects topic bindings before any set is created.
pub struct ContextBuilder<S: Serializer = JsonSerializer> {
    bus: Arc<MessageBus<S>>,
    registrations: Vec<(TypeId, Registration<S>)>,
}

impl<S: Serializer> ContextBuilder<S> {
    /// Start an empty registration list on `bus`.
    pub fn new(bus: Arc<MessageBus<S>>) -> Self {
        Self {
            bus,
            registrations: Vec::new(),
        }
    }

    /// Bind `T` to `binding`.
    pub fn register<T: TopicMessage>(mut self, binding: TopicBinding) -> Self {
        self.registrations.push((
            TypeId::of::<T>(),
            Registration {
                type_name: any::type_name::<T>(),
                binding,
                build: build_erased::<T, S>,
            },
        ));
        self
    }

    /// Check the table and create a set for every binding without a
    /// placeholder.
    ///
    /// Fails with `Ambiguous` if a type was registered twice.
    pub fn build(self) -> Result<BusContext<S>, BindingError> {
        let mut bindings: HashMap<TypeId, Registration<S>> = HashMap::new();
        for (type_id, registration) in self.registrations {
            if bindings.contains_key(&type_id) {
                return Err(BindingError::Ambiguous(registration.type_name));
            }
            bindings.insert(type_id, registration);
        }

        let mut sets = HashMap::new();
        for (type_id, registration) in &bindings {
            if registration.binding.has_placeholder() {
                continue;
            }
            let set = (registration.build)(&self.bus, &registration.binding)?;
            debug!(
                message_type = registration.type_name,
                topic = registration.binding.template(),
                "topic set initialized"
            );
            sets.insert(*type_id, set);
        }

        Ok(BusContext {
            bus: self.bus,
            bindings,
            sets,
        })
    }
}

/// Resolves registered message types into topic sets.
pub struct BusContext<S: Serializer = JsonSerializer> {
    bus: Arc<MessageBus<S>>,
    bindings: HashMap<TypeId, Registration<S>>,
    sets: HashMap<TypeId, ErasedSet>,
}

impl<S: Serializer> BusContext<S> {
    /// The set for `T`. Sets created at build time are shared; templates
    /// with a placeholder are resolved verbatim.
    pub fn set<T: TopicMessage>(&self) -> Result<Arc<TopicSet<T, S>>, BindingError> {
        let type_id = TypeId::of::<T>();
        if let Some(set) = self
            .sets
            .get(&type_id)
            .and_then(|set| set.downcast_ref::<Arc<TopicSet<T, S>>>())
        {
            return Ok(Arc::clone(set));
        }

        construct(&self.bus, self.binding::<T>()?, None)
    }

    /// A set for `T` with `@` in its template replaced by `value`.
    pub fn set_with_override<T: TopicMessage>(
        &self,
        value: &str,
    ) -> Result<Arc<TopicSet<T, S>>, BindingError> {
        construct(&self.bus, self.binding::<T>()?, Some(value))
    }

    /// The binding registered for `T`.
    pub fn binding<T: TopicMessage>(&self) -> Result<&TopicBinding, BindingError> {
        self.bindings
            .get(&TypeId::of::<T>())
            .map(|registration| &registration.binding)
            .ok_or(BindingError::Missing(any::type_name::<T>()))
    }

    pub fn bus(&self) -> &Arc<MessageBus<S>> {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_template_is_rejected() {
        assert_eq!(
            TopicBinding::new("  "),
            Err(BindingError::InvalidTemplate("  ".to_string()))
        );
    }

    #[test]
    fn resolve_without_override_is_verbatim() {
        let binding = TopicBinding::new("orders.created").unwrap();
        assert_eq!(binding.resolve(None).unwrap(), "orders.created");
        assert_eq!(binding.resolve(Some("acme")).unwrap(), "orders.created");
    }

    #[test]
    fn resolve_replaces_every_placeholder() {
        let binding = TopicBinding::new("tenant.@.events.@").unwrap();
        assert!(binding.has_placeholder());
        assert_eq!(binding.resolve(Some("acme")).unwrap(), "tenant.acme.events.acme");
    }

    #[test]
    fn wildcards_need_opt_in() {
        let strict = TopicBinding::new("orders.*").unwrap();
        assert_eq!(
            strict.resolve(None),
            Err(BindingError::WildcardNotAllowed("orders.*".to_string()))
        );

        let placeholder = TopicBinding::new("orders.@").unwrap();
        assert!(matches!(
            placeholder.resolve(Some("*")),
            Err(BindingError::WildcardNotAllowed(_))
        ));

        let relaxed = TopicBinding::new("orders.*").unwrap().allow_wildcards(true);
        assert_eq!(relaxed.resolve(None).unwrap(), "orders.*");
    }

    #[test]
    fn consumer_group_is_carried() {
        let binding = TopicBinding::new("orders").unwrap().consumer_group("billing");
        assert_eq!(binding.group(), Some("billing"));
        assert!(!binding.wildcards_allowed());
    }
}
