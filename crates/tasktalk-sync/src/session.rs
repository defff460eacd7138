use uuid::Uuid;

use tasktalk_types::models::User;

/// The signed-in user. Passed explicitly to every user-scoped facade.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub token: String,
}

impl Session {
    pub fn user_id(&self) -> Uuid {
        self.user.uid
    }
}
