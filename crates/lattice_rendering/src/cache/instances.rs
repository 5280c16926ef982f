//! Live instances of one mesh.

use glam::Mat4;

use crate::culling::Aabb;

use super::asset::InstanceHandle;

/// One placed instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceRecord {
    /// Instance handle.
    pub handle: InstanceHandle,
    /// Object-to-world transform.
    pub transform: Mat4,
    /// Disabled instances stay cached but are never submitted.
    pub enabled: bool,
}

/// Instances sharing one cache entry.
///
/// Records keep insertion order. World matrices and bounds of the enabled
/// records are derived arrays, rebuilt by the cache's deferred pass.
#[derive(Debug, Clone, Default)]
pub struct InstanceGroup {
    records: Vec<InstanceRecord>,
    world_matrices: Vec<Mat4>,
    world_bounds: Vec<Aabb>,
    bounds: Aabb,
    dirty: bool,
}

impl InstanceGroup {
    /// All records, enabled or not.
    #[must_use]
    pub fn records(&self) -> &[InstanceRecord] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the group holds no record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if `handle` belongs to this group.
    #[must_use]
    pub fn contains(&self, handle: InstanceHandle) -> bool {
        self.records.iter().any(|r| r.handle == handle)
    }

    /// World matrices of the enabled records, as of the last rebuild.
    /// Position in this slice is the instance index seen by the GPU.
    #[must_use]
    pub fn world_matrices(&self) -> &[Mat4] {
        &self.world_matrices
    }

    /// World bounds of the enabled records, parallel to
    /// [`world_matrices`](Self::world_matrices).
    #[must_use]
    pub fn world_bounds(&self) -> &[Aabb] {
        &self.world_bounds
    }

    /// Union of [`world_bounds`](Self::world_bounds).
    #[must_use]
    pub const fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Returns true if the derived arrays are stale.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn push(&mut self, record: InstanceRecord) {
        self.records.push(record);
        self.dirty = true;
    }

    pub(crate) fn remove(&mut self, handle: InstanceHandle) -> Option<InstanceRecord> {
        let at = self.records.iter().position(|r| r.handle == handle)?;
        self.dirty = true;
        Some(self.records.remove(at))
    }

    /// Returns `None` for an unknown handle, otherwise whether the
    /// transform changed.
    pub(crate) fn set_transform(&mut self, handle: InstanceHandle, transform: Mat4) -> Option<bool> {
        let record = self.records.iter_mut().find(|r| r.handle == handle)?;
        let changed = record.transform != transform;
        if changed {
            record.transform = transform;
            self.dirty = true;
        }
        Some(changed)
    }

    /// Same contract as [`set_transform`](Self::set_transform).
    pub(crate) fn set_enabled(&mut self, handle: InstanceHandle, enabled: bool) -> Option<bool> {
        let record = self.records.iter_mut().find(|r| r.handle == handle)?;
        let changed = record.enabled != enabled;
        if changed {
            record.enabled = enabled;
            self.dirty = true;
        }
        Some(changed)
    }

    pub(crate) fn rebuild(&mut self, local_bounds: &Aabb) {
        self.world_matrices.clear();
        self.world_bounds.clear();
        self.bounds = Aabb::EMPTY;
        for record in self.records.iter().filter(|r| r.enabled) {
            let world = local_bounds.transformed(&record.transform);
            self.world_matrices.push(record.transform);
            self.world_bounds.push(world);
            self.bounds = self.bounds.union(&world);
        }
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn record(raw: u64, x: f32, enabled: bool) -> InstanceRecord {
        InstanceRecord {
            handle: InstanceHandle::from_raw(raw),
            transform: Mat4::from_translation(Vec3::X * x),
            enabled,
        }
    }

    #[test]
    fn test_rebuild_skips_disabled() {
        let mut group = InstanceGroup::default();
        group.push(record(1, 0.0, true));
        group.push(record(2, 10.0, false));
        group.push(record(3, 20.0, true));
        assert!(group.is_dirty());

        let unit = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        group.rebuild(&unit);
        assert!(!group.is_dirty());
        assert_eq!(group.world_matrices().len(), 2);
        assert_eq!(group.world_bounds()[1].min.x, 19.0);
        assert_eq!(group.bounds().max.x, 21.0);
    }

    #[test]
    fn test_unchanged_transform_stays_clean() {
        let mut group = InstanceGroup::default();
        group.push(record(1, 5.0, true));
        group.rebuild(&Aabb::EMPTY);

        let same = Mat4::from_translation(Vec3::X * 5.0);
        assert_eq!(group.set_transform(InstanceHandle::from_raw(1), same), Some(false));
        assert!(!group.is_dirty());
        assert_eq!(group.set_enabled(InstanceHandle::from_raw(1), false), Some(true));
        assert!(group.is_dirty());
        assert_eq!(group.set_enabled(InstanceHandle::from_raw(9), false), None);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut group = InstanceGroup::default();
        for raw in 1..=3 {
            group.push(record(raw, raw as f32, true));
        }
        assert!(group.remove(InstanceHandle::from_raw(2)).is_some());
        assert!(group.remove(InstanceHandle::from_raw(2)).is_none());
        let handles: Vec<u64> = group.records().iter().map(|r| r.handle.raw()).collect();
        assert_eq!(handles, vec![1, 3]);
    }
}
