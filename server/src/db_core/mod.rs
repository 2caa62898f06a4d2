pub mod test;

pub mod prelude {
    pub use entity::prelude::*;
    pub use entity::sea_orm_active_enums::*;
    pub use entity::{
        approval_history, dead_letter_queue, email_processing_queue, folder_category,
        indexing_progress, manual_notification, user, workflow_checkpoint, workflow_mapping,
    };
    pub use sea_orm::sea_query::{Expr, OnConflict};
    pub use sea_orm::{
        entity::*, query::*, ActiveValue, DatabaseConnection, DbErr, FromQueryResult, InsertResult,
        JoinType, PaginatorTrait, RuntimeErr,
    };
}
