//! Queue family selection and queue-creation grouping.

use ash::vk;

use crate::error::{DeviceError, Result};

pub const QUEUE_PRIORITY: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Present,
    Transfer,
    Graphics,
    Compute,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
}

/// The family chosen for each role. Several roles may share a family.
#[derive(Debug, Clone, Copy)]
pub struct Queues {
    pub present: QueueFamily,
    pub transfer: QueueFamily,
    pub graphics: QueueFamily,
    pub compute: QueueFamily,
}

impl Queues {
    /// Chooses a family for every role.
    ///
    /// Graphics, transfer and compute each take the last family advertising
    /// the matching flag. `present_support` reports whether a family can
    /// present to the target surface; without one the present role shares
    /// the graphics family.
    pub fn select(
        families: &[vk::QueueFamilyProperties],
        present_support: Option<&dyn Fn(u32) -> Result<bool>>,
    ) -> Result<Self> {
        if families.is_empty() {
            return Err(DeviceError::NoDevicesFound);
        }

        let mut graphics = None;
        let mut transfer = None;
        let mut compute = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            if family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
                transfer = Some(index);
            }
            if family.queue_flags.contains(vk::QueueFlags::COMPUTE) {
                compute = Some(index);
            }
        }

        let graphics = or_first_family(graphics, "graphics");
        let transfer = or_first_family(transfer, "transfer");
        let compute = or_first_family(compute, "compute");

        let present = match present_support {
            None => graphics,
            Some(supports) => {
                if supports(graphics)? {
                    graphics
                } else {
                    let mut present = None;
                    for index in 0..families.len() as u32 {
                        if supports(index)? {
                            present = Some(index);
                        }
                    }
                    present.ok_or(DeviceError::NoPresentQueue)?
                }
            }
        };

        let family = |index: u32| QueueFamily {
            index,
            properties: families[index as usize],
        };

        Ok(Self {
            present: family(present),
            transfer: family(transfer),
            graphics: family(graphics),
            compute: family(compute),
        })
    }

    pub fn family(&self, role: QueueRole) -> &QueueFamily {
        match role {
            QueueRole::Present => &self.present,
            QueueRole::Transfer => &self.transfer,
            QueueRole::Graphics => &self.graphics,
            QueueRole::Compute => &self.compute,
        }
    }

    /// Groups roles sharing a family into one queue-creation request each.
    pub fn groups(&self) -> Vec<QueueGroup> {
        let mut groups: Vec<QueueGroup> = Vec::new();

        for role in [QueueRole::Graphics, QueueRole::Transfer, QueueRole::Compute] {
            let family = self.family(role);
            match groups.iter_mut().find(|group| group.family_index == family.index) {
                Some(group) => group.roles.push(role),
                None => groups.push(QueueGroup {
                    family_index: family.index,
                    max_queues: family.properties.queue_count,
                    roles: vec![role],
                }),
            }
        }

        match groups
            .iter_mut()
            .find(|group| group.family_index == self.present.index)
        {
            Some(group) => group.roles.push(QueueRole::Present),
            None => groups.push(QueueGroup {
                family_index: self.present.index,
                max_queues: self.present.properties.queue_count,
                roles: vec![QueueRole::Present],
            }),
        }

        groups
    }
}

fn or_first_family(index: Option<u32>, role: &str) -> u32 {
    index.unwrap_or_else(|| {
        log::warn!("No queue family advertises {role} support, using family 0");
        0
    })
}

/// One `VkDeviceQueueCreateInfo` worth of queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueGroup {
    pub family_index: u32,
    pub max_queues: u32,
    pub roles: Vec<QueueRole>,
}

impl QueueGroup {
    /// Number of queues to create. The present role reuses the queue of the
    /// role it shares a family with, so it only counts when it is alone.
    pub fn queue_count(&self) -> u32 {
        let wanted = self
            .roles
            .iter()
            .filter(|role| **role != QueueRole::Present)
            .count()
            .max(1) as u32;
        wanted.min(self.max_queues).max(1)
    }

    pub fn priorities(&self) -> Vec<f32> {
        vec![QUEUE_PRIORITY; self.queue_count() as usize]
    }

    /// Index of the queue inside the family that `role` should use.
    pub fn queue_index(&self, role: QueueRole) -> Option<u32> {
        if role == QueueRole::Present {
            return self.roles.contains(&role).then_some(0);
        }

        let position = self
            .roles
            .iter()
            .filter(|r| **r != QueueRole::Present)
            .position(|r| *r == role)? as u32;
        Some(position.min(self.queue_count() - 1))
    }
}
