/// Which of the two character shapes is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Standing,
    Crouched,
}

/// Change the controller has to mirror on the rigid body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrouchTransition {
    /// Swap to the crouched shape. When `in_air`, lift the body by the height
    /// difference so the head stays in place.
    Crouch { in_air: bool },
    /// Swap back to the standing shape. When `lower`, move the body down by
    /// the height difference, undoing an air crouch.
    Stand { lower: bool },
}

/// Crouch request bookkeeping.
///
/// `request` only records intent. The change is carried out by `try_crouch`
/// (pre-step) or `try_uncrouch` (post-step); a blocked uncrouch stays pending
/// and is retried until it succeeds or is cancelled by another request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrouchState {
    crouched: bool,
    air_crouched: bool,
    state_changed: bool,
}

impl CrouchState {
    pub fn request(&mut self, crouched: bool) {
        self.state_changed = self.crouched != crouched;
    }

    pub fn is_crouched(&self) -> bool {
        self.crouched
    }

    /// Crouched while airborne, with the body lifted
    pub fn is_air_crouched(&self) -> bool {
        self.air_crouched
    }

    /// A request is waiting to be carried out
    pub fn is_pending(&self) -> bool {
        self.state_changed
    }

    pub fn stance(&self) -> Stance {
        if self.crouched {
            Stance::Crouched
        } else {
            Stance::Standing
        }
    }

    pub fn wants_to_crouch(&self) -> bool {
        self.state_changed && !self.crouched
    }

    pub fn wants_to_stand(&self) -> bool {
        self.state_changed && self.crouched
    }

    /// Crouching is never blocked.
    pub fn try_crouch(&mut self, on_ground_or_will_be: bool) -> Option<CrouchTransition> {
        if !self.wants_to_crouch() {
            return None;
        }

        self.crouched = true;
        self.state_changed = false;
        self.air_crouched = !on_ground_or_will_be;
        Some(CrouchTransition::Crouch {
            in_air: self.air_crouched,
        })
    }

    /// Stands up when the standing shape fits. The air crouch lift is undone
    /// only when the lowered standing shape fits too.
    pub fn try_uncrouch(&mut self, can_uncrouch: bool, can_air_uncrouch: bool) -> Option<CrouchTransition> {
        if !self.wants_to_stand() || !can_uncrouch {
            return None;
        }

        let lower = self.air_crouched && can_air_uncrouch;
        self.crouched = false;
        self.air_crouched = false;
        self.state_changed = false;
        Some(CrouchTransition::Stand { lower })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
