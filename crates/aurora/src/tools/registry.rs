//! Capability registry: operation name to descriptor.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult, ToolFault};

use super::schema::{CapabilityDescriptor, InvocationMode};

/// Collects descriptors before any batch runs.
///
/// Registration only happens here; [`CapabilityRegistryBuilder::build`] freezes the
/// set into a [`CapabilityRegistry`] that has no mutating methods, so concurrent
/// lookups from one batch never need a lock.
#[derive(Default)]
pub struct CapabilityRegistryBuilder {
    capabilities: HashMap<String, CapabilityDescriptor>,
}

impl CapabilityRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability. Fails if the operation name is already taken.
    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> CoreResult<&mut Self> {
        if self.capabilities.contains_key(&descriptor.operation_name) {
            return Err(CoreError::DuplicateCapability(descriptor.operation_name));
        }
        self.capabilities
            .insert(descriptor.operation_name.clone(), descriptor);
        Ok(self)
    }

    pub fn register_all<I>(&mut self, descriptors: I) -> CoreResult<&mut Self>
    where
        I: IntoIterator<Item = CapabilityDescriptor>,
    {
        for descriptor in descriptors {
            self.register(descriptor)?;
        }
        Ok(self)
    }

    pub fn build(self) -> Arc<CapabilityRegistry> {
        Arc::new(CapabilityRegistry {
            capabilities: self.capabilities,
        })
    }
}

/// Read-only view over registered capabilities.
pub struct CapabilityRegistry {
    capabilities: HashMap<String, CapabilityDescriptor>,
}

impl CapabilityRegistry {
    /// Registry with nothing in it.
    pub fn empty() -> Arc<Self> {
        CapabilityRegistryBuilder::new().build()
    }

    /// Look up an operation. Unknown names become a validation fault.
    pub fn lookup(&self, operation_name: &str) -> Result<&CapabilityDescriptor, ToolFault> {
        self.capabilities.get(operation_name).ok_or_else(|| {
            ToolFault::Validation(format!("unknown operation '{operation_name}'"))
        })
    }

    pub fn contains(&self, operation_name: &str) -> bool {
        self.capabilities.contains_key(operation_name)
    }

    /// Sorted operation names.
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Sorted `(name, mode)` pairs, for listing what the reasoning layer may call.
    pub fn modes(&self) -> Vec<(&str, InvocationMode)> {
        let mut modes: Vec<(&str, InvocationMode)> = self
            .capabilities
            .values()
            .map(|descriptor| {
                (
                    descriptor.operation_name.as_str(),
                    descriptor.invocation_mode(),
                )
            })
            .collect();
        modes.sort_unstable_by(|left, right| left.0.cmp(right.0));
        modes
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
