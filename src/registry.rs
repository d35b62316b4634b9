//! Table of message variants keyed by wire identifier.
//!
//! The transport has no compile-time knowledge of the messages it carries.
//! Applications declare each variant once with [`Registry::register`],
//! freeze the registry with [`Registry::verify`], and hand it to the pool.
//! The pool then resolves inbound identifiers to decoders, and outbound
//! values back to identifiers, through this table.

use std::{any::TypeId, collections::HashMap, fmt};

use thiserror::Error;

use crate::{
    message::{DecodeError, Message},
    prefix::{MessagePrefix, PrefixError},
};

type DecodeFn<S> = fn(&[u8]) -> Result<(Box<dyn Message<S>>, usize), DecodeError>;

/// Wiring mistakes detected while building a [`Registry`].
///
/// These indicate a defect in application start-up code rather than a
/// runtime condition; callers should abort instead of recovering.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistryError {
    /// The identifier already maps to another variant.
    #[error("message prefix {prefix} is already registered to {existing}")]
    DuplicatePrefix {
        /// Identifier that was registered twice.
        prefix: MessagePrefix,
        /// Type already holding the identifier.
        existing: &'static str,
    },
    /// The variant is already registered under another identifier.
    #[error("message type {type_name} is already registered as {prefix}")]
    DuplicateType {
        /// Type that was registered twice.
        type_name: &'static str,
        /// Identifier it already holds.
        prefix: MessagePrefix,
    },
    /// A registered identifier breaks the prefix rules.
    #[error("message prefix {prefix:?} for {type_name} is invalid: {source}")]
    InvalidPrefix {
        /// The offending identifier.
        prefix: MessagePrefix,
        /// Type registered under it.
        type_name: &'static str,
        /// Which rule was broken.
        #[source]
        source: PrefixError,
    },
}

/// A registered message variant.
pub struct MessageType<S> {
    prefix: MessagePrefix,
    type_name: &'static str,
    decode: DecodeFn<S>,
}

impl<S> MessageType<S> {
    /// Wire identifier of the variant.
    #[must_use]
    pub fn prefix(&self) -> MessagePrefix { self.prefix }

    /// Rust type name of the variant, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str { self.type_name }

    /// Decode a body into a fresh value of this variant.
    ///
    /// # Errors
    ///
    /// Returns the variant's [`DecodeError`] if the body is invalid.
    pub fn decode(&self, body: &[u8]) -> Result<(Box<dyn Message<S>>, usize), DecodeError> {
        (self.decode)(body)
    }
}

impl<S> fmt::Debug for MessageType<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageType")
            .field("prefix", &self.prefix)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

fn decode_boxed<S, M>(body: &[u8]) -> Result<(Box<dyn Message<S>>, usize), DecodeError>
where
    M: Message<S>,
{
    let (message, used) = M::decode(body)?;
    let message: Box<dyn Message<S>> = Box::new(message);
    Ok((message, used))
}

/// Mapping between wire identifiers and message variants.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use peerwire::{
///     Registry,
///     message::{DecodeError, EncodeError, HandlerError, Message, MessageContext, Serializer},
/// };
///
/// #[derive(Debug)]
/// struct Verack;
///
/// impl Serializer for Verack {
///     fn encode_size(&self) -> usize { 0 }
///     fn encode(&self, _dst: &mut BytesMut) -> Result<(), EncodeError> { Ok(()) }
///     fn decode(_src: &[u8]) -> Result<(Self, usize), DecodeError> { Ok((Verack, 0)) }
/// }
///
/// impl Message<()> for Verack {
///     fn handle(self: Box<Self>, _ctx: MessageContext, _state: &()) -> Result<(), HandlerError> {
///         Ok(())
///     }
/// }
///
/// let registry = Registry::<()>::new()
///     .register::<Verack>(*b"VACK")
///     .expect("unique registration");
/// registry.verify().expect("valid prefixes");
/// assert_eq!(registry.len(), 1);
/// ```
pub struct Registry<S> {
    by_prefix: HashMap<MessagePrefix, MessageType<S>>,
    by_type: HashMap<TypeId, MessagePrefix>,
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self {
            by_prefix: HashMap::new(),
            by_type: HashMap::new(),
        }
    }
}

impl<S> fmt::Debug for Registry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.by_prefix.values()).finish()
    }
}

impl<S> Registry<S> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Associate `prefix` with the message variant `M`.
    ///
    /// The prefix itself is not validated here; [`Registry::verify`] checks
    /// every prefix once registration is complete.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicatePrefix`] if `prefix` is taken and
    /// [`RegistryError::DuplicateType`] if `M` is already registered.
    pub fn register<M>(mut self, prefix: impl Into<MessagePrefix>) -> Result<Self, RegistryError>
    where
        M: Message<S>,
    {
        let prefix = prefix.into();
        let type_id = TypeId::of::<M>();
        let type_name = std::any::type_name::<M>();
        if let Some(existing) = self.by_prefix.get(&prefix) {
            return Err(RegistryError::DuplicatePrefix {
                prefix,
                existing: existing.type_name,
            });
        }
        if let Some(&prefix) = self.by_type.get(&type_id) {
            return Err(RegistryError::DuplicateType { type_name, prefix });
        }
        self.by_type.insert(type_id, prefix);
        self.by_prefix.insert(
            prefix,
            MessageType {
                prefix,
                type_name,
                decode: decode_boxed::<S, M>,
            },
        );
        Ok(self)
    }

    /// Validate every registered prefix.
    ///
    /// Run once after all registrations and before any socket is opened.
    /// Prefixes are checked in byte order so the reported error is stable.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidPrefix`] for the first prefix that
    /// breaks the identifier rules.
    pub fn verify(&self) -> Result<(), RegistryError> {
        let mut entries: Vec<_> = self.by_prefix.values().collect();
        entries.sort_by_key(|entry| entry.prefix);
        for entry in entries {
            entry
                .prefix
                .validate()
                .map_err(|source| RegistryError::InvalidPrefix {
                    prefix: entry.prefix,
                    type_name: entry.type_name,
                    source,
                })?;
        }
        Ok(())
    }

    /// Remove every registration.
    pub fn erase(&mut self) {
        self.by_prefix.clear();
        self.by_type.clear();
    }

    /// Resolve a wire identifier to its variant.
    #[must_use]
    pub fn lookup(&self, prefix: &MessagePrefix) -> Option<&MessageType<S>> {
        self.by_prefix.get(prefix)
    }

    /// Identifier registered for the concrete type behind `message`.
    #[must_use]
    pub fn prefix_of(&self, message: &dyn Message<S>) -> Option<MessagePrefix> {
        self.by_type.get(&message.as_any().type_id()).copied()
    }

    /// Identifier registered for `M`.
    #[must_use]
    pub fn prefix_for<M: Message<S>>(&self) -> Option<MessagePrefix> {
        self.by_type.get(&TypeId::of::<M>()).copied()
    }

    /// Number of registered variants.
    #[must_use]
    pub fn len(&self) -> usize { self.by_prefix.len() }

    /// Whether no variant is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.by_prefix.is_empty() }

    /// Registered identifiers in byte order.
    #[must_use]
    pub fn prefixes(&self) -> Vec<MessagePrefix> {
        let mut prefixes: Vec<_> = self.by_prefix.keys().copied().collect();
        prefixes.sort();
        prefixes
    }
}
