use rapier3d::prelude::*;

use crate::physics::PhysicsSpace;

/// Filter used by every character query: skips the character's own body and
/// all sensors, probes included.
pub fn character_filter(body: RigidBodyHandle) -> QueryFilter<'static> {
    QueryFilter::default().exclude_rigid_body(body).exclude_sensors()
}

/// Box sensor that never takes part in collisions. It is moved to wherever a
/// test is needed and asked whether anything solid overlaps it.
#[derive(Debug)]
pub struct ProbeVolume {
    collider: ColliderHandle,
    half_extents: Vector<Real>,
}

impl ProbeVolume {
    pub fn attach(space: &mut PhysicsSpace) -> Self {
        let half_extents = vector![0.5, 0.5, 0.5];
        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            .sensor(true)
            .collision_groups(InteractionGroups::none())
            .build();
        let collider = space.add_free_collider(collider);
        Self { collider, half_extents }
    }

    pub fn detach(self, space: &mut PhysicsSpace) {
        space.remove_collider(self.collider);
    }

    /// Moves the probe so it is centred on `center` with the given half extents
    pub fn place(&mut self, space: &mut PhysicsSpace, center: Vector<Real>, half_extents: Vector<Real>) {
        let Some(collider) = space.collider_set.get_mut(self.collider) else {
            return;
        };
        if half_extents != self.half_extents {
            collider.set_shape(SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z));
            self.half_extents = half_extents;
        }
        collider.set_translation(center);
    }

    /// Places a box whose bottom face sits at `feet`
    pub fn place_on_feet(&mut self, space: &mut PhysicsSpace, feet: Vector<Real>, radius: f32, height: f32) {
        self.place(
            space,
            feet + vector![0.0, height * 0.5, 0.0],
            vector![radius, height * 0.5, radius],
        );
    }

    pub fn overlaps(&self, space: &PhysicsSpace, filter: QueryFilter) -> bool {
        let Some(collider) = space.collider_set.get(self.collider) else {
            return false;
        };
        space.overlaps_any(collider.shape(), collider.position(), filter)
    }
}

/// Probes owned by one character.
#[derive(Debug)]
pub struct ProbeSet {
    /// Thin box at the feet
    pub ground: ProbeVolume,
    /// Standing box for uncrouch and air-uncrouch tests
    pub uncrouch: ProbeVolume,
    /// Raised box used to validate a ledge climb
    pub ledge: ProbeVolume,
}

impl ProbeSet {
    pub fn attach(space: &mut PhysicsSpace) -> Self {
        Self {
            ground: ProbeVolume::attach(space),
            uncrouch: ProbeVolume::attach(space),
            ledge: ProbeVolume::attach(space),
        }
    }

    pub fn detach(self, space: &mut PhysicsSpace) {
        self.ground.detach(space);
        self.uncrouch.detach(space);
        self.ledge.detach(space);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::UnitQuaternion;

    #[test]
    fn test_probe_detects_solid_but_not_other_probes() {
        let mut space = PhysicsSpace::new();
        space.add_fixed_box(vector![0.0, -0.5, 0.0], vector![5.0, 0.5, 5.0], UnitQuaternion::identity());
        let body = space.add_dynamic_box(vector![3.0, 1.0, 0.0], vector![0.25, 0.5, 0.25], 1.0);

        let mut a = ProbeVolume::attach(&mut space);
        let mut b = ProbeVolume::attach(&mut space);
        b.place(&mut space, vector![0.0, 3.0, 0.0], vector![1.0, 1.0, 1.0]);

        a.place(&mut space, vector![0.0, 3.0, 0.0], vector![0.2, 0.2, 0.2]);
        space.refresh_queries();
        assert!(!a.overlaps(&space, character_filter(body)), "Probes must not see each other");

        a.place_on_feet(&mut space, vector![0.0, -0.05, 0.0], 0.2, 0.1);
        space.refresh_queries();
        assert!(a.overlaps(&space, character_filter(body)));

        a.place_on_feet(&mut space, vector![3.0, 0.5, 0.0], 0.2, 0.5);
        space.refresh_queries();
        assert!(!a.overlaps(&space, character_filter(body)), "Own body is ignored");
    }

    #[test]
    fn test_probe_set_detach_removes_colliders() {
        let mut space = PhysicsSpace::new();
        let probes = ProbeSet::attach(&mut space);
        assert_eq!(space.collider_set.len(), 3);
        probes.detach(&mut space);
        assert_eq!(space.collider_set.len(), 0);
    }
}
