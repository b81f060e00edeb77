use crate::CoreError;
use stratus_store::LifecycleState;

pub fn validate_transition(from: LifecycleState, to: LifecycleState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            LifecycleState::PendingCreate,
            LifecycleState::Live | LifecycleState::Tainted
        ) | (
            LifecycleState::Live,
            LifecycleState::Live | LifecycleState::PendingCreate | LifecycleState::Removed
        ) | (
            LifecycleState::Tainted,
            LifecycleState::Removed | LifecycleState::PendingCreate
        )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
