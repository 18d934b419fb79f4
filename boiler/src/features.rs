// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Feature tiers and the chain of feature structs handed to device creation.
//!
//! Vulkan groups its optional hardware features by the API version that introduced them. This
//! module models the four tiers [`Features10`], [`Features11`], [`Features12`] and
//! [`Features13`], which correspond to `VkPhysicalDeviceFeatures` and the
//! `VkPhysicalDeviceVulkan1XFeatures` structs.
//!
//! For each tier, the application can register:
//!
//! - *pickers*, which look at the features the device supports and return the ones they want
//!   enabled. Pickers never see each other's requests; their results are combined with a union.
//! - *validators*, which check the supported features and name the first missing one.
//!
//! # Example
//!
//! ```
//! use boiler::features::{FeaturePolicies, Features12, Features13, TieredFeatures};
//! use boiler::Version;
//!
//! let mut policies = FeaturePolicies::new(Version::V1_3);
//! policies
//!     .add_picker(|supported: &Features12| Features12 {
//!         imageless_framebuffer: supported.imageless_framebuffer,
//!         ..Features12::none()
//!     })
//!     .unwrap();
//! policies
//!     .add_validator(Features13 {
//!         dynamic_rendering: true,
//!         ..Features13::none()
//!     })
//!     .unwrap();
//!
//! let mut supported = TieredFeatures::none();
//! supported.v1_2.imageless_framebuffer = true;
//! supported.v1_3.dynamic_rendering = true;
//!
//! let chain = policies.build_chain(&supported).unwrap();
//! assert!(chain.enabled::<Features12>().unwrap().imageless_framebuffer);
//! ```

use crate::{BoilerError, Version};
use smallvec::SmallVec;
use std::fmt;

macro_rules! feature_tiers {
    {
        $(
            $(#[doc = $doc:literal])*
            $ty:ident = $ffi:ty, $version:ident, $slot:literal, $variant:ident, $field:ident {
                $($member:ident,)+
            }
        )+
    } => {
        $(
            $(#[doc = $doc])*
            #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
            #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
            #[allow(missing_docs)]
            pub struct $ty {
                $(pub $member: bool,)+
            }

            impl $ty {
                #[doc = concat!("Builds a `", stringify!($ty), "` with all values set to false.")]
                #[inline]
                pub const fn none() -> Self {
                    Self {
                        $($member: false,)+
                    }
                }

                #[doc = concat!("Builds a `", stringify!($ty), "` with all values set to true.")]
                #[inline]
                pub const fn all() -> Self {
                    Self {
                        $($member: true,)+
                    }
                }

                /// Returns whether every feature that is true in `other` is also true in `self`.
                #[inline]
                pub const fn superset_of(&self, other: &Self) -> bool {
                    $((self.$member || !other.$member))&&+
                }

                /// Returns the features that are true in `self` or in `other`.
                #[inline]
                pub const fn union(&self, other: &Self) -> Self {
                    Self {
                        $($member: self.$member || other.$member,)+
                    }
                }

                /// Returns the features that are true in both `self` and `other`.
                #[inline]
                pub const fn intersection(&self, other: &Self) -> Self {
                    Self {
                        $($member: self.$member && other.$member,)+
                    }
                }

                /// Returns the features that are true in `self` but not in `other`.
                #[inline]
                pub const fn difference(&self, other: &Self) -> Self {
                    Self {
                        $($member: self.$member && !other.$member,)+
                    }
                }

                /// Returns whether all features are false.
                #[inline]
                pub const fn is_empty(&self) -> bool {
                    $(!self.$member)&&+
                }

                /// Returns the name of the first feature that is true in `required` but not in
                /// `self`.
                pub fn first_missing(&self, required: &Self) -> Option<&'static str> {
                    $(
                        if required.$member && !self.$member {
                            return Some(stringify!($member));
                        }
                    )+

                    None
                }

                /// Returns the names of the features that are true.
                pub fn names(&self) -> Vec<&'static str> {
                    let mut names = Vec::new();
                    $(
                        if self.$member {
                            names.push(stringify!($member));
                        }
                    )+

                    names
                }
            }

            impl From<&$ffi> for $ty {
                #[inline]
                fn from(ffi: &$ffi) -> Self {
                    Self {
                        $($member: ffi.$member != ash::vk::FALSE,)+
                    }
                }
            }

            impl From<&$ty> for $ffi {
                #[inline]
                fn from(val: &$ty) -> Self {
                    let mut ffi = Self::default();
                    $(ffi.$member = val.$member as ash::vk::Bool32;)+

                    ffi
                }
            }

            impl FeatureTier for $ty {
                const VERSION: Version = Version::$version;
                const SLOT: usize = $slot;

                #[inline]
                fn get(features: &TieredFeatures) -> &Self {
                    &features.$field
                }

                #[inline]
                fn get_mut(features: &mut TieredFeatures) -> &mut Self {
                    &mut features.$field
                }

                #[inline]
                fn policies(policies: &FeaturePolicies) -> &TierPolicies<Self> {
                    &policies.$field
                }

                #[inline]
                fn policies_mut(policies: &mut FeaturePolicies) -> &mut TierPolicies<Self> {
                    &mut policies.$field
                }

                #[inline]
                fn into_bits(self) -> TierBits {
                    TierBits::$variant(self)
                }

                #[inline]
                fn from_bits(bits: &TierBits) -> Option<&Self> {
                    match bits {
                        TierBits::$variant(features) => Some(features),
                        _ => None,
                    }
                }

                #[inline]
                fn union(&self, other: &Self) -> Self {
                    $ty::union(self, other)
                }

                #[inline]
                fn difference(&self, other: &Self) -> Self {
                    $ty::difference(self, other)
                }

                #[inline]
                fn is_empty(&self) -> bool {
                    $ty::is_empty(self)
                }

                #[inline]
                fn first_missing(&self, required: &Self) -> Option<&'static str> {
                    $ty::first_missing(self, required)
                }

                #[inline]
                fn names(&self) -> Vec<&'static str> {
                    $ty::names(self)
                }
            }
        )+

        /// The supported or enabled features of every tier of a physical device.
        ///
        /// Tiers above the API version of the device are left at `none()`.
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct TieredFeatures {
            $(pub $field: $ty,)+
        }

        impl TieredFeatures {
            /// Builds a `TieredFeatures` with every feature of every tier set to false.
            #[inline]
            pub const fn none() -> Self {
                Self {
                    $($field: $ty::none(),)+
                }
            }
        }

        /// The features of one tier, tagged with the tier they belong to.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum TierBits {
            $($variant($ty),)+
        }

        impl TierBits {
            /// Returns the API version that introduced this tier.
            #[inline]
            pub fn version(&self) -> Version {
                match self {
                    $(TierBits::$variant(_) => Version::$version,)+
                }
            }

            /// Returns the names of the features that are true.
            pub fn names(&self) -> Vec<&'static str> {
                match self {
                    $(TierBits::$variant(features) => features.names(),)+
                }
            }

            fn write_into(&self, out: &mut TieredFeatures) {
                match self {
                    $(TierBits::$variant(features) => out.$field = *features,)+
                }
            }
        }

        /// The pickers and validators registered for every tier.
        pub struct FeaturePolicies {
            api_version: Version,
            $($field: TierPolicies<$ty>,)+
        }

        impl FeaturePolicies {
            /// Creates an empty set of policies for a session that uses `api_version`.
            pub fn new(api_version: Version) -> Self {
                FeaturePolicies {
                    api_version: api_version.without_patch(),
                    $($field: TierPolicies::default(),)+
                }
            }

            /// Builds the feature chain for a device that supports `supported`.
            ///
            /// Every tier at or below the configured API version is linked, lowest tier first.
            /// For each tier, the pickers are combined into the enabled features, and then the
            /// validators are run against the supported features.
            pub fn build_chain(
                &self,
                supported: &TieredFeatures,
            ) -> Result<FeatureChain, BoilerError> {
                let mut chain = FeatureChain::default();
                $(self.link_tier::<$ty>(supported, &mut chain)?;)+

                Ok(chain)
            }
        }

        impl fmt::Debug for FeaturePolicies {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut debug = f.debug_struct("FeaturePolicies");
                debug.field("api_version", &self.api_version);
                $(debug.field(stringify!($field), &self.$field);)+

                debug.finish()
            }
        }
    };
}

/// One of the feature tiers.
pub trait FeatureTier: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// The API version that introduced this tier.
    const VERSION: Version;

    /// The position of this tier in a [`FeatureChain`].
    const SLOT: usize;

    fn get(features: &TieredFeatures) -> &Self;

    fn get_mut(features: &mut TieredFeatures) -> &mut Self;

    #[doc(hidden)]
    fn policies(policies: &FeaturePolicies) -> &TierPolicies<Self>;

    #[doc(hidden)]
    fn policies_mut(policies: &mut FeaturePolicies) -> &mut TierPolicies<Self>;

    fn into_bits(self) -> TierBits;

    fn from_bits(bits: &TierBits) -> Option<&Self>;

    fn union(&self, other: &Self) -> Self;

    fn difference(&self, other: &Self) -> Self;

    fn is_empty(&self) -> bool;

    fn first_missing(&self, required: &Self) -> Option<&'static str>;

    fn names(&self) -> Vec<&'static str>;
}

feature_tiers! {
    /// The features of `VkPhysicalDeviceFeatures`, available since Vulkan 1.0.
    ///
    /// Note that `robust_buffer_access` is guaranteed to be supported by all Vulkan
    /// implementations.
    Features10 = ash::vk::PhysicalDeviceFeatures, V1_0, 0, V1_0, v1_0 {
        robust_buffer_access,
        full_draw_index_uint32,
        image_cube_array,
        independent_blend,
        geometry_shader,
        tessellation_shader,
        sample_rate_shading,
        dual_src_blend,
        logic_op,
        multi_draw_indirect,
        draw_indirect_first_instance,
        depth_clamp,
        depth_bias_clamp,
        fill_mode_non_solid,
        depth_bounds,
        wide_lines,
        large_points,
        alpha_to_one,
        multi_viewport,
        sampler_anisotropy,
        texture_compression_etc2,
        texture_compression_astc_ldr,
        texture_compression_bc,
        occlusion_query_precise,
        pipeline_statistics_query,
        vertex_pipeline_stores_and_atomics,
        fragment_stores_and_atomics,
        shader_tessellation_and_geometry_point_size,
        shader_image_gather_extended,
        shader_storage_image_extended_formats,
        shader_storage_image_multisample,
        shader_storage_image_read_without_format,
        shader_storage_image_write_without_format,
        shader_uniform_buffer_array_dynamic_indexing,
        shader_sampled_image_array_dynamic_indexing,
        shader_storage_buffer_array_dynamic_indexing,
        shader_storage_image_array_dynamic_indexing,
        shader_clip_distance,
        shader_cull_distance,
        shader_float64,
        shader_int64,
        shader_int16,
        shader_resource_residency,
        shader_resource_min_lod,
        sparse_binding,
        sparse_residency_buffer,
        sparse_residency_image2_d,
        sparse_residency_image3_d,
        sparse_residency2_samples,
        sparse_residency4_samples,
        sparse_residency8_samples,
        sparse_residency16_samples,
        sparse_residency_aliased,
        variable_multisample_rate,
        inherited_queries,
    }

    /// The features of `VkPhysicalDeviceVulkan11Features`.
    Features11 = ash::vk::PhysicalDeviceVulkan11Features<'_>, V1_1, 1, V1_1, v1_1 {
        storage_buffer16_bit_access,
        uniform_and_storage_buffer16_bit_access,
        storage_push_constant16,
        storage_input_output16,
        multiview,
        multiview_geometry_shader,
        multiview_tessellation_shader,
        variable_pointers_storage_buffer,
        variable_pointers,
        protected_memory,
        sampler_ycbcr_conversion,
        shader_draw_parameters,
    }

    /// The features of `VkPhysicalDeviceVulkan12Features`.
    Features12 = ash::vk::PhysicalDeviceVulkan12Features<'_>, V1_2, 2, V1_2, v1_2 {
        sampler_mirror_clamp_to_edge,
        draw_indirect_count,
        storage_buffer8_bit_access,
        uniform_and_storage_buffer8_bit_access,
        storage_push_constant8,
        shader_buffer_int64_atomics,
        shader_shared_int64_atomics,
        shader_float16,
        shader_int8,
        descriptor_indexing,
        shader_input_attachment_array_dynamic_indexing,
        shader_uniform_texel_buffer_array_dynamic_indexing,
        shader_storage_texel_buffer_array_dynamic_indexing,
        shader_uniform_buffer_array_non_uniform_indexing,
        shader_sampled_image_array_non_uniform_indexing,
        shader_storage_buffer_array_non_uniform_indexing,
        shader_storage_image_array_non_uniform_indexing,
        shader_input_attachment_array_non_uniform_indexing,
        shader_uniform_texel_buffer_array_non_uniform_indexing,
        shader_storage_texel_buffer_array_non_uniform_indexing,
        descriptor_binding_uniform_buffer_update_after_bind,
        descriptor_binding_sampled_image_update_after_bind,
        descriptor_binding_storage_image_update_after_bind,
        descriptor_binding_storage_buffer_update_after_bind,
        descriptor_binding_uniform_texel_buffer_update_after_bind,
        descriptor_binding_storage_texel_buffer_update_after_bind,
        descriptor_binding_update_unused_while_pending,
        descriptor_binding_partially_bound,
        descriptor_binding_variable_descriptor_count,
        runtime_descriptor_array,
        sampler_filter_minmax,
        scalar_block_layout,
        imageless_framebuffer,
        uniform_buffer_standard_layout,
        shader_subgroup_extended_types,
        separate_depth_stencil_layouts,
        host_query_reset,
        timeline_semaphore,
        buffer_device_address,
        buffer_device_address_capture_replay,
        buffer_device_address_multi_device,
        vulkan_memory_model,
        vulkan_memory_model_device_scope,
        vulkan_memory_model_availability_visibility_chains,
        shader_output_viewport_index,
        shader_output_layer,
        subgroup_broadcast_dynamic_id,
    }

    /// The features of `VkPhysicalDeviceVulkan13Features`.
    Features13 = ash::vk::PhysicalDeviceVulkan13Features<'_>, V1_3, 3, V1_3, v1_3 {
        robust_image_access,
        inline_uniform_block,
        descriptor_binding_inline_uniform_block_update_after_bind,
        pipeline_creation_cache_control,
        private_data,
        shader_demote_to_helper_invocation,
        shader_terminate_invocation,
        subgroup_size_control,
        compute_full_subgroups,
        synchronization2,
        texture_compression_astc_hdr,
        shader_zero_initialize_workgroup_memory,
        dynamic_rendering,
        shader_integer_dot_product,
        maintenance4,
    }
}

impl TieredFeatures {
    /// Returns the features of tier `F`.
    #[inline]
    pub fn get<F: FeatureTier>(&self) -> &F {
        F::get(self)
    }

    /// Returns the features of tier `F`.
    #[inline]
    pub fn get_mut<F: FeatureTier>(&mut self) -> &mut F {
        F::get_mut(self)
    }
}

/// Chooses the features of one tier that should be enabled.
///
/// Implemented for every `Fn(&F) -> F`.
pub trait FeaturePicker<F>: Send + Sync {
    /// Returns the features to enable, given the features the device supports.
    fn pick(&self, supported: &F) -> F;
}

impl<F, T> FeaturePicker<F> for T
where
    T: Fn(&F) -> F + Send + Sync,
{
    #[inline]
    fn pick(&self, supported: &F) -> F {
        self(supported)
    }
}

/// Checks that the features of one tier are good enough.
///
/// Every feature tier is a validator itself: it requires all of its true features to be
/// supported. Use [`FeatureCheck`] for anything more involved.
pub trait FeatureValidator<F>: Send + Sync {
    /// Returns the name of the missing feature if `supported` is not good enough.
    fn check(&self, supported: &F) -> Result<(), &'static str>;
}

impl<F: FeatureTier> FeatureValidator<F> for F {
    fn check(&self, supported: &F) -> Result<(), &'static str> {
        match supported.first_missing(self) {
            Some(missing) => Err(missing),
            None => Ok(()),
        }
    }
}

/// A validator that runs an arbitrary check and reports `name` when it fails.
///
/// ```
/// use boiler::features::{FeatureCheck, Features10};
///
/// let check = FeatureCheck::new("any 64-bit shader type", |supported: &Features10| {
///     supported.shader_int64 || supported.shader_float64
/// });
/// # let _ = check;
/// ```
pub struct FeatureCheck<C> {
    name: &'static str,
    check: C,
}

impl<C> FeatureCheck<C> {
    #[inline]
    pub fn new(name: &'static str, check: C) -> Self {
        FeatureCheck { name, check }
    }
}

impl<F, C> FeatureValidator<F> for FeatureCheck<C>
where
    C: Fn(&F) -> bool + Send + Sync,
{
    fn check(&self, supported: &F) -> Result<(), &'static str> {
        if (self.check)(supported) {
            Ok(())
        } else {
            Err(self.name)
        }
    }
}

/// The pickers and validators of one tier, in registration order.
pub struct TierPolicies<F> {
    pickers: Vec<Box<dyn FeaturePicker<F>>>,
    validators: Vec<Box<dyn FeatureValidator<F>>>,
}

impl<F> Default for TierPolicies<F> {
    fn default() -> Self {
        TierPolicies {
            pickers: Vec::new(),
            validators: Vec::new(),
        }
    }
}

impl<F> fmt::Debug for TierPolicies<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierPolicies")
            .field("pickers", &self.pickers.len())
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl FeaturePolicies {
    /// Returns the API version the policies were configured for.
    #[inline]
    pub fn api_version(&self) -> Version {
        self.api_version
    }

    /// Registers a picker for tier `F`.
    ///
    /// Returns [`BoilerError::VersionTooLow`] if `F` needs a higher API version than the one
    /// these policies were configured for.
    pub fn add_picker<F: FeatureTier>(
        &mut self,
        picker: impl FeaturePicker<F> + 'static,
    ) -> Result<(), BoilerError> {
        self.check_tier::<F>()?;
        F::policies_mut(self).pickers.push(Box::new(picker));

        Ok(())
    }

    /// Registers a validator for tier `F`.
    ///
    /// Returns [`BoilerError::VersionTooLow`] if `F` needs a higher API version than the one
    /// these policies were configured for.
    pub fn add_validator<F: FeatureTier>(
        &mut self,
        validator: impl FeatureValidator<F> + 'static,
    ) -> Result<(), BoilerError> {
        self.check_tier::<F>()?;
        F::policies_mut(self).validators.push(Box::new(validator));

        Ok(())
    }

    fn check_tier<F: FeatureTier>(&self) -> Result<(), BoilerError> {
        if F::VERSION > self.api_version {
            return Err(BoilerError::VersionTooLow {
                required: F::VERSION,
                configured: self.api_version,
            });
        }

        Ok(())
    }

    fn link_tier<F: FeatureTier>(
        &self,
        supported: &TieredFeatures,
        chain: &mut FeatureChain,
    ) -> Result<(), BoilerError> {
        if F::VERSION > self.api_version {
            return Ok(());
        }

        let supported = *F::get(supported);
        let policies = F::policies(self);

        let enabled = policies
            .pickers
            .iter()
            .fold(F::default(), |enabled, picker| {
                enabled.union(&picker.pick(&supported))
            });

        for validator in &policies.validators {
            validator
                .check(&supported)
                .map_err(|feature| BoilerError::UnsupportedFeature {
                    tier: F::VERSION,
                    feature,
                })?;
        }

        let forced = enabled.difference(&supported);

        if !forced.is_empty() {
            log::warn!(
                "enabling features of tier {} that the device does not report: {:?}",
                F::VERSION,
                forced.names(),
            );
        }

        chain.link(
            F::SLOT,
            FeatureRecord {
                supported: supported.into_bits(),
                enabled: enabled.into_bits(),
                next: None,
            },
        );

        Ok(())
    }
}

/// One link of a [`FeatureChain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureRecord {
    supported: TierBits,
    enabled: TierBits,
    next: Option<usize>,
}

impl FeatureRecord {
    /// Returns the API version that introduced the tier of this link.
    #[inline]
    pub fn version(&self) -> Version {
        self.supported.version()
    }

    /// Returns the features the device reported for this tier.
    #[inline]
    pub fn supported(&self) -> &TierBits {
        &self.supported
    }

    /// Returns the features that will be enabled for this tier.
    #[inline]
    pub fn enabled(&self) -> &TierBits {
        &self.enabled
    }
}

/// The feature structs of one device creation call, linked lowest tier first.
///
/// Links live in a fixed array with one slot per tier, and point at the next link by index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureChain {
    links: [Option<FeatureRecord>; 4],
    head: Option<usize>,
    tail: Option<usize>,
}

impl FeatureChain {
    fn link(&mut self, slot: usize, record: FeatureRecord) {
        debug_assert!(self.links[slot].is_none());
        self.links[slot] = Some(record);

        match self.tail.and_then(|tail| self.links[tail].as_mut()) {
            Some(tail) => tail.next = Some(slot),
            None => self.head = Some(slot),
        }

        self.tail = Some(slot);
    }

    /// Returns the links of the chain, in chain order.
    #[inline]
    pub fn iter(&self) -> FeatureChainIter<'_> {
        FeatureChainIter {
            chain: self,
            next: self.head,
        }
    }

    /// Returns the number of links.
    #[inline]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns whether the chain has a link for the tier introduced by `version`.
    #[inline]
    pub fn contains(&self, version: Version) -> bool {
        self.iter().any(|record| record.version() == version)
    }

    /// Returns the versions of the linked tiers, in chain order.
    pub fn versions(&self) -> SmallVec<[Version; 4]> {
        self.iter().map(FeatureRecord::version).collect()
    }

    /// Returns the link of tier `F`, if it is part of the chain.
    #[inline]
    pub fn get<F: FeatureTier>(&self) -> Option<&FeatureRecord> {
        self.links[F::SLOT].as_ref()
    }

    /// Returns the enabled features of tier `F`, if it is part of the chain.
    #[inline]
    pub fn enabled<F: FeatureTier>(&self) -> Option<&F> {
        self.get::<F>().and_then(|record| F::from_bits(&record.enabled))
    }

    /// Returns the supported features of tier `F`, if it is part of the chain.
    #[inline]
    pub fn supported<F: FeatureTier>(&self) -> Option<&F> {
        self.get::<F>().and_then(|record| F::from_bits(&record.supported))
    }

    /// Collects the enabled features of every link. Tiers that are not linked are `none()`.
    pub fn enabled_features(&self) -> TieredFeatures {
        let mut features = TieredFeatures::none();

        for record in self.iter() {
            record.enabled.write_into(&mut features);
        }

        features
    }
}

/// Iterator over the links of a [`FeatureChain`].
pub struct FeatureChainIter<'a> {
    chain: &'a FeatureChain,
    next: Option<usize>,
}

impl<'a> Iterator for FeatureChainIter<'a> {
    type Item = &'a FeatureRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.chain.links[self.next?].as_ref()?;
        self.next = record.next;

        Some(record)
    }
}
