pub mod user_attributes;
pub mod users;

pub use user_attributes::Entity as UserAttributes;
pub use user_attributes::Model as UserAttribute;
pub use users::Entity as Users;
pub use users::Model as User;
