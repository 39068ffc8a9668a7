pub mod data_aging;
