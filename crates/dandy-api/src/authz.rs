//! Central capability checks. Ownership and entitlement rules used to be
//! scattered equality checks in every handler; they all route through
//! `can` now so a mutating operation can't forget one.

use uuid::Uuid;

use dandy_types::WishError;
use dandy_types::models::Wish;
use dandy_types::quota::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    AmplifyWish,
    UpdateProgress,
    EditMilestones,
    TogglePause,
    DeleteWish,
}

/// Whether `user_id` may perform `action` on `wish`. Every current action
/// is owner-only; the match stays explicit so new actions must declare
/// their rule.
pub fn can(user_id: Uuid, action: Action, wish: &Wish) -> bool {
    let is_owner = wish.user_id == user_id;
    match action {
        Action::AmplifyWish
        | Action::UpdateProgress
        | Action::EditMilestones
        | Action::TogglePause
        | Action::DeleteWish => is_owner,
    }
}

pub fn ensure_can(user_id: Uuid, action: Action, wish: &Wish) -> Result<(), WishError> {
    if can(user_id, action, wish) {
        Ok(())
    } else {
        Err(WishError::Forbidden(format!(
            "user {} does not own wish {}",
            user_id, wish.id
        )))
    }
}

/// Milestone editing is additionally gated on the premium tier.
pub fn ensure_premium(subscription: &Subscription, feature: &str) -> Result<(), WishError> {
    if subscription.is_premium() {
        Ok(())
    } else {
        Err(WishError::PremiumRequired(feature.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn wish_owned_by(owner: Uuid) -> Wish {
        Wish {
            id: Uuid::new_v4(),
            user_id: owner,
            body: "x".to_string(),
            category: "misc".to_string(),
            progress: 0,
            is_private: false,
            support_count: 0,
            milestones: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn owner_can_mutate_stranger_cannot() {
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let wish = wish_owned_by(owner);

        assert!(can(owner, Action::AmplifyWish, &wish));
        assert!(can(owner, Action::TogglePause, &wish));
        assert!(!can(stranger, Action::AmplifyWish, &wish));
        assert!(matches!(
            ensure_can(stranger, Action::DeleteWish, &wish),
            Err(WishError::Forbidden(_))
        ));
    }

    #[test]
    fn premium_gate() {
        assert!(ensure_premium(&Subscription::premium(), "milestones").is_ok());
        assert!(matches!(
            ensure_premium(&Subscription::free(), "milestones"),
            Err(WishError::PremiumRequired(_))
        ));
    }
}
