// Copyright (c) 2016 The vulkano developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Queue families, and which family plays which role.

use crate::{driver::DeviceDriver, macros::vulkan_bitflags, NameSet};
use ash::vk;
use smallvec::{smallvec, SmallVec};

/// The name of the device extension that enables the video encode queue role.
pub const VIDEO_ENCODE_QUEUE_EXTENSION: &str = "VK_KHR_video_encode_queue";
/// The name of the device extension that enables the video decode queue role.
pub const VIDEO_DECODE_QUEUE_EXTENSION: &str = "VK_KHR_video_decode_queue";

vulkan_bitflags! {
    /// Attributes of a queue or queue family.
    QueueFlags = QueueFlags(u32);

    /// Queues of this family can execute graphics operations.
    GRAPHICS = GRAPHICS,

    /// Queues of this family can execute compute operations.
    COMPUTE = COMPUTE,

    /// Queues of this family can execute transfer operations.
    TRANSFER = TRANSFER,

    /// Queues of this family can execute sparse memory management operations.
    SPARSE_BINDING = SPARSE_BINDING,

    /// Queues of this family can be created using the `protected` flag.
    PROTECTED = PROTECTED,

    /// Queues of this family can execute video decode operations.
    VIDEO_DECODE = VIDEO_DECODE_KHR,

    /// Queues of this family can execute video encode operations.
    VIDEO_ENCODE = VIDEO_ENCODE_KHR,
}

/// Properties of a queue family in a physical device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueFamilyProperties {
    /// Attributes of the queue family.
    pub queue_flags: QueueFlags,

    /// The number of queues available in this family.
    pub queue_count: u32,
}

impl QueueFamilyProperties {
    /// Returns a family of one queue with the given flags.
    #[inline]
    pub fn new(queue_flags: QueueFlags) -> Self {
        QueueFamilyProperties {
            queue_flags,
            queue_count: 1,
        }
    }
}

impl From<&vk::QueueFamilyProperties> for QueueFamilyProperties {
    #[inline]
    fn from(val: &vk::QueueFamilyProperties) -> Self {
        QueueFamilyProperties {
            queue_flags: val.queue_flags.into(),
            queue_count: val.queue_count,
        }
    }
}

/// The queue family assigned to a role, and the priorities of the queues to create in it.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueFamilyAllocation {
    /// The index of the queue family, or `-1` if no family can play the role.
    pub family_index: i32,

    /// One priority per queue, each between 0.0 and 1.0.
    pub priorities: SmallVec<[f32; 1]>,
}

impl QueueFamilyAllocation {
    /// An allocation of a single queue with priority 1.0.
    #[inline]
    pub fn single(family_index: i32) -> Self {
        QueueFamilyAllocation {
            family_index,
            priorities: smallvec![1.0],
        }
    }

    /// The allocation of a role that no family can play.
    #[inline]
    pub fn unavailable() -> Self {
        QueueFamilyAllocation::single(-1)
    }

    /// Returns the family index, or `None` for the `-1` sentinel.
    #[inline]
    pub fn index(&self) -> Option<u32> {
        u32::try_from(self.family_index).ok()
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.family_index >= 0
    }
}

/// Which queue family plays which role.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueFamilyMapping {
    pub graphics: QueueFamilyAllocation,
    pub compute: QueueFamilyAllocation,
    pub present: QueueFamilyAllocation,
    pub video_encode: Option<QueueFamilyAllocation>,
    pub video_decode: Option<QueueFamilyAllocation>,

    /// The family that can present to every window, or `-1`.
    pub present_family_index: i32,
}

impl QueueFamilyMapping {
    /// Returns every assigned family once, in role order, with the priorities of the first role
    /// that claimed it. Roles with the `-1` sentinel are skipped.
    pub fn unique_families(&self) -> SmallVec<[(u32, SmallVec<[f32; 1]>); 4]> {
        let mut families: SmallVec<[(u32, SmallVec<[f32; 1]>); 4]> = SmallVec::new();

        let roles = [&self.graphics, &self.compute, &self.present]
            .into_iter()
            .chain(self.video_encode.as_ref())
            .chain(self.video_decode.as_ref());

        for allocation in roles {
            if let Some(index) = allocation.index() {
                if families.iter().all(|(family, _)| *family != index) {
                    families.push((index, allocation.priorities.clone()));
                }
            }
        }

        families
    }
}

/// Decides which queue family plays which role.
pub trait QueueFamilyMapper: Send + Sync {
    /// Maps the queue families of a device to roles.
    ///
    /// `present_support[i]` tells whether family `i` can present to every window of the
    /// session. It is all `false` when the session has no windows.
    fn map_queue_families(
        &self,
        queue_families: &[QueueFamilyProperties],
        device_extensions: &NameSet,
        present_support: &[bool],
    ) -> QueueFamilyMapping;
}

/// A mapper that uses as few queue families as it can, and one queue per family.
///
/// A family that can do graphics, compute and present is used for all three. Otherwise a family
/// that offers two roles at once displaces an earlier family that only offers one of them.
#[derive(Clone, Copy, Debug, Default)]
pub struct MinimalQueueFamilyMapper;

impl QueueFamilyMapper for MinimalQueueFamilyMapper {
    fn map_queue_families(
        &self,
        queue_families: &[QueueFamilyProperties],
        device_extensions: &NameSet,
        present_support: &[bool],
    ) -> QueueFamilyMapping {
        let try_encode = device_extensions.contains(VIDEO_ENCODE_QUEUE_EXTENSION);
        let try_decode = device_extensions.contains(VIDEO_DECODE_QUEUE_EXTENSION);

        let mut encode_index = -1;
        let mut decode_index = -1;

        for (family_index, family) in (0..).zip(queue_families) {
            let has_encode = try_encode && family.queue_flags.intersects(QueueFlags::VIDEO_ENCODE);
            let has_decode = try_decode && family.queue_flags.intersects(QueueFlags::VIDEO_DECODE);

            if has_encode && has_decode {
                encode_index = family_index;
                decode_index = family_index;
                break;
            }

            if encode_index == -1 && has_encode {
                encode_index = family_index;
            }
            if decode_index == -1 && has_decode {
                decode_index = family_index;
            }
        }

        let video_encode =
            (encode_index != -1).then(|| QueueFamilyAllocation::single(encode_index));
        let video_decode =
            (decode_index != -1).then(|| QueueFamilyAllocation::single(decode_index));

        let mut graphics_index = -1;
        let mut compute_index = -1;
        let mut present_index = -1;

        for (family_index, family) in (0..).zip(queue_families) {
            let has_graphics = family.queue_flags.intersects(QueueFlags::GRAPHICS);
            let has_compute = family.queue_flags.intersects(QueueFlags::COMPUTE);
            let has_present = present_support
                .get(family_index as usize)
                .copied()
                .unwrap_or(false);

            if has_graphics && has_compute && has_present {
                return QueueFamilyMapping {
                    graphics: QueueFamilyAllocation::single(family_index),
                    compute: QueueFamilyAllocation::single(family_index),
                    present: QueueFamilyAllocation::single(family_index),
                    video_encode,
                    video_decode,
                    present_family_index: family_index,
                };
            }

            if graphics_index == -1 && has_graphics {
                graphics_index = family_index;
            }
            if compute_index == -1 && has_compute {
                compute_index = family_index;
            }
            if has_graphics && has_compute {
                graphics_index = family_index;
                compute_index = family_index;
            }

            if present_index == -1 && has_present {
                present_index = family_index;
            }
            if (has_graphics || has_compute) && has_present {
                present_index = family_index;
            }
        }

        QueueFamilyMapping {
            graphics: QueueFamilyAllocation::single(graphics_index),
            compute: QueueFamilyAllocation::single(compute_index),
            present: QueueFamilyAllocation::single(present_index),
            video_encode,
            video_decode,
            present_family_index: present_index,
        }
    }
}

/// A queue that was retrieved from the logical device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Queue {
    pub handle: vk::Queue,
    pub family_index: u32,
}

/// The queues of a session, one per role. Roles that share a family share the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: Option<Queue>,
    pub compute: Option<Queue>,
    pub present: Option<Queue>,
    pub video_encode: Option<Queue>,
    pub video_decode: Option<Queue>,
}

impl QueueFamilies {
    /// Retrieves the first queue of every assigned family.
    pub fn retrieve(device: &dyn DeviceDriver, mapping: &QueueFamilyMapping) -> Self {
        let queue = |allocation: Option<&QueueFamilyAllocation>| {
            allocation.and_then(QueueFamilyAllocation::index).map(|family_index| Queue {
                handle: device.queue(family_index, 0),
                family_index,
            })
        };

        QueueFamilies {
            graphics: queue(Some(&mapping.graphics)),
            compute: queue(Some(&mapping.compute)),
            present: queue(Some(&mapping.present)),
            video_encode: queue(mapping.video_encode.as_ref()),
            video_decode: queue(mapping.video_decode.as_ref()),
        }
    }
}
