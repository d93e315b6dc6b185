pub mod event_query;
