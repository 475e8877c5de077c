pub mod backup;
pub mod category;
pub mod chapter;
pub mod download;
pub mod history;
pub mod manga;
pub mod merged;
pub mod page;
pub mod saved_search;
pub mod track;
