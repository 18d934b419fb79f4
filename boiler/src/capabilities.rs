// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Desired and required layer and extension names, and how they are resolved against what the
//! driver advertises.
//!
//! Resolution always follows the same rule:
//!
//! ```text
//! enabled = (desired ∩ available) ∪ required
//! ```
//!
//! and fails if a required name is not available. A name may be required without being desired.

use crate::BoilerError;
use std::fmt;

/// A set of layer or extension names.
pub type NameSet = foldhash::HashSet<String>;

/// Builds a [`NameSet`] from a list of names.
pub fn name_set<I>(names: I) -> NameSet
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

/// The kind of name that is being negotiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CapabilityScope {
    Layer,
    InstanceExtension,
    DeviceExtension,
}

impl fmt::Display for CapabilityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                CapabilityScope::Layer => "layer",
                CapabilityScope::InstanceExtension => "instance extension",
                CapabilityScope::DeviceExtension => "device extension",
            }
        )
    }
}

/// The layers and extensions an application would like to use, and those it cannot do without.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub desired_layers: NameSet,
    pub required_layers: NameSet,
    pub desired_instance_extensions: NameSet,
    pub required_instance_extensions: NameSet,
    pub desired_device_extensions: NameSet,
    pub required_device_extensions: NameSet,
}

impl CapabilitySet {
    /// Returns an empty `CapabilitySet`.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a name that should be enabled if it is available.
    pub fn desire(&mut self, scope: CapabilityScope, name: impl Into<String>) {
        self.desired_mut(scope).insert(name.into());
    }

    /// Adds a name that must be enabled.
    pub fn require(&mut self, scope: CapabilityScope, name: impl Into<String>) {
        self.required_mut(scope).insert(name.into());
    }

    #[inline]
    pub fn desired(&self, scope: CapabilityScope) -> &NameSet {
        match scope {
            CapabilityScope::Layer => &self.desired_layers,
            CapabilityScope::InstanceExtension => &self.desired_instance_extensions,
            CapabilityScope::DeviceExtension => &self.desired_device_extensions,
        }
    }

    #[inline]
    pub fn required(&self, scope: CapabilityScope) -> &NameSet {
        match scope {
            CapabilityScope::Layer => &self.required_layers,
            CapabilityScope::InstanceExtension => &self.required_instance_extensions,
            CapabilityScope::DeviceExtension => &self.required_device_extensions,
        }
    }

    fn desired_mut(&mut self, scope: CapabilityScope) -> &mut NameSet {
        match scope {
            CapabilityScope::Layer => &mut self.desired_layers,
            CapabilityScope::InstanceExtension => &mut self.desired_instance_extensions,
            CapabilityScope::DeviceExtension => &mut self.desired_device_extensions,
        }
    }

    fn required_mut(&mut self, scope: CapabilityScope) -> &mut NameSet {
        match scope {
            CapabilityScope::Layer => &mut self.required_layers,
            CapabilityScope::InstanceExtension => &mut self.required_instance_extensions,
            CapabilityScope::DeviceExtension => &mut self.required_device_extensions,
        }
    }

    /// Returns whether `name` is desired or required in `scope`.
    #[inline]
    pub fn contains(&self, scope: CapabilityScope, name: &str) -> bool {
        self.desired(scope).contains(name) || self.required(scope).contains(name)
    }

    /// Returns the union of `self` and `other`, scope by scope.
    pub fn union(&self, other: &CapabilitySet) -> CapabilitySet {
        let union = |a: &NameSet, b: &NameSet| -> NameSet { a.union(b).cloned().collect() };

        CapabilitySet {
            desired_layers: union(&self.desired_layers, &other.desired_layers),
            required_layers: union(&self.required_layers, &other.required_layers),
            desired_instance_extensions: union(
                &self.desired_instance_extensions,
                &other.desired_instance_extensions,
            ),
            required_instance_extensions: union(
                &self.required_instance_extensions,
                &other.required_instance_extensions,
            ),
            desired_device_extensions: union(
                &self.desired_device_extensions,
                &other.desired_device_extensions,
            ),
            required_device_extensions: union(
                &self.required_device_extensions,
                &other.required_device_extensions,
            ),
        }
    }

    /// Resolves the names of `scope` against the `available` names.
    #[inline]
    pub fn resolve(
        &self,
        scope: CapabilityScope,
        available: &NameSet,
    ) -> Result<NameSet, BoilerError> {
        resolve(scope, self.desired(scope), self.required(scope), available)
    }

    /// Returns the required names of `scope` that are not in `available`, sorted.
    pub fn missing(&self, scope: CapabilityScope, available: &NameSet) -> Vec<String> {
        missing(self.required(scope), available)
    }
}

/// Computes `(desired ∩ available) ∪ required`.
///
/// Returns a [`BoilerError::MissingCapability`] listing every required name that is not in
/// `available`. Desired names that are not available are dropped without an error.
pub fn resolve(
    scope: CapabilityScope,
    desired: &NameSet,
    required: &NameSet,
    available: &NameSet,
) -> Result<NameSet, BoilerError> {
    let missing = missing(required, available);

    if !missing.is_empty() {
        return Err(BoilerError::MissingCapability { scope, missing });
    }

    let mut enabled: NameSet = desired
        .iter()
        .filter(|name| {
            let keep = available.contains(name.as_str());

            if !keep {
                log::debug!("desired {} {} is not available", scope, name);
            }

            keep
        })
        .cloned()
        .collect();
    enabled.extend(required.iter().cloned());

    log::debug!("enabled {}s: {:?}", scope, sorted(&enabled));

    Ok(enabled)
}

fn missing(required: &NameSet, available: &NameSet) -> Vec<String> {
    let mut missing: Vec<String> = required
        .iter()
        .filter(|name| !available.contains(name.as_str()))
        .cloned()
        .collect();
    missing.sort_unstable();

    missing
}

/// Returns the names of `set` in alphabetical order.
pub fn sorted(set: &NameSet) -> Vec<&str> {
    let mut names: Vec<&str> = set.iter().map(String::as_str).collect();
    names.sort_unstable();

    names
}

#[cfg(test)]
mod tests {
    use super::{name_set, resolve, CapabilityScope, CapabilitySet};
    use crate::BoilerError;

    #[test]
    fn desired_and_available() {
        let enabled = resolve(
            CapabilityScope::InstanceExtension,
            &name_set(["VK_KHR_surface", "VK_EXT_debug_utils"]),
            &name_set(["VK_KHR_get_surface_capabilities2"]),
            &name_set([
                "VK_KHR_surface",
                "VK_KHR_get_surface_capabilities2",
                "VK_KHR_xcb_surface",
            ]),
        )
        .unwrap();

        assert_eq!(
            enabled,
            name_set(["VK_KHR_surface", "VK_KHR_get_surface_capabilities2"]),
        );
    }

    #[test]
    fn required_without_desired() {
        let enabled = resolve(
            CapabilityScope::Layer,
            &name_set(Vec::<String>::new()),
            &name_set(["VK_LAYER_KHRONOS_validation"]),
            &name_set(["VK_LAYER_KHRONOS_validation", "VK_LAYER_LUNARG_api_dump"]),
        )
        .unwrap();

        assert_eq!(enabled, name_set(["VK_LAYER_KHRONOS_validation"]));
    }

    #[test]
    fn every_missing_name_is_reported() {
        let result = resolve(
            CapabilityScope::DeviceExtension,
            &name_set(["VK_KHR_swapchain"]),
            &name_set(["VK_KHR_swapchain", "VK_KHR_video_queue", "VK_EXT_mesh_shader"]),
            &name_set(["VK_KHR_swapchain"]),
        );

        match result {
            Err(BoilerError::MissingCapability { scope, missing }) => {
                assert_eq!(scope, CapabilityScope::DeviceExtension);
                assert_eq!(missing, ["VK_EXT_mesh_shader", "VK_KHR_video_queue"]);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn required_is_subset_of_result() {
        let available = name_set(["a", "b", "c", "d"]);

        for required in [vec![], vec!["a"], vec!["a", "d"], vec!["b", "c", "d"]] {
            let required = name_set(required);
            let enabled = resolve(
                CapabilityScope::InstanceExtension,
                &name_set(["c", "x"]),
                &required,
                &available,
            )
            .unwrap();

            assert!(enabled.is_superset(&required));
            assert!(enabled.is_subset(&available));
            assert!(enabled.contains("c"));
        }
    }

    #[test]
    fn scopes_are_independent() {
        let mut capabilities = CapabilitySet::new();
        capabilities.require(CapabilityScope::DeviceExtension, "VK_KHR_swapchain");
        capabilities.desire(CapabilityScope::InstanceExtension, "VK_KHR_surface");

        assert!(capabilities.contains(CapabilityScope::DeviceExtension, "VK_KHR_swapchain"));
        assert!(!capabilities.contains(CapabilityScope::InstanceExtension, "VK_KHR_swapchain"));
        assert!(capabilities
            .resolve(CapabilityScope::InstanceExtension, &name_set(["VK_KHR_swapchain"]))
            .unwrap()
            .is_empty());
        assert_eq!(
            capabilities.missing(CapabilityScope::DeviceExtension, &name_set(["VK_KHR_surface"])),
            ["VK_KHR_swapchain"],
        );
    }

    #[test]
    fn union() {
        let mut a = CapabilitySet::new();
        a.desire(CapabilityScope::Layer, "VK_LAYER_KHRONOS_validation");
        let mut b = CapabilitySet::new();
        b.require(CapabilityScope::Layer, "VK_LAYER_LUNARG_api_dump");
        b.desire(CapabilityScope::Layer, "VK_LAYER_KHRONOS_validation");

        let union = a.union(&b);
        assert_eq!(union.desired_layers, name_set(["VK_LAYER_KHRONOS_validation"]));
        assert_eq!(union.required_layers, name_set(["VK_LAYER_LUNARG_api_dump"]));
    }
}
