// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use std::{cmp::Ordering, fmt};

/// An API version of Vulkan, as requested by the application or reported by the driver.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Version {
    /// Major version number.
    pub major: u32,
    /// Minor version number.
    pub minor: u32,
    /// Patch version number.
    pub patch: u32,
}

impl Version {
    pub const V1_0: Version = Version::major_minor(1, 0);
    pub const V1_1: Version = Version::major_minor(1, 1);
    pub const V1_2: Version = Version::major_minor(1, 2);
    pub const V1_3: Version = Version::major_minor(1, 3);

    /// Constructs a `Version` from the given major and minor version numbers.
    #[inline]
    pub const fn major_minor(major: u32, minor: u32) -> Version {
        Version {
            major,
            minor,
            patch: 0,
        }
    }

    /// Returns this version with the patch number cleared.
    ///
    /// Negotiation only ever compares major and minor numbers, so every version that enters the
    /// pipeline goes through this first.
    #[inline]
    pub const fn without_patch(self) -> Version {
        Version::major_minor(self.major, self.minor)
    }

    /// Turns a version number given by Vulkan into a `Version` struct.
    #[inline]
    pub const fn from_vulkan_version(value: u32) -> Version {
        Version {
            major: ash::vk::api_version_major(value),
            minor: ash::vk::api_version_minor(value),
            patch: ash::vk::api_version_patch(value),
        }
    }

    /// Turns a `Version` into a version number accepted by Vulkan. The variant is always 0.
    ///
    /// # Panics
    ///
    /// - Panics if the values in the `Version` are out of acceptable range.
    #[inline]
    pub fn into_vulkan_version(self) -> u32 {
        assert!(self.major <= 0x7f);
        assert!(self.minor <= 0x3ff);
        assert!(self.patch <= 0xfff);

        ash::vk::make_api_version(0, self.major, self.minor, self.patch)
    }
}

impl Default for Version {
    #[inline]
    fn default() -> Self {
        Version::V1_0
    }
}

impl From<u32> for Version {
    #[inline]
    fn from(val: u32) -> Self {
        Version::from_vulkan_version(val)
    }
}

impl From<Version> for u32 {
    #[inline]
    fn from(val: Version) -> Self {
        val.into_vulkan_version()
    }
}

impl PartialOrd for Version {
    #[inline]
    fn partial_cmp(&self, other: &Version) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Version) -> Ordering {
        match self.major.cmp(&other.major) {
            Ordering::Equal => (),
            o => return o,
        };

        match self.minor.cmp(&other.minor) {
            Ordering::Equal => (),
            o => return o,
        };

        self.patch.cmp(&other.patch)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
