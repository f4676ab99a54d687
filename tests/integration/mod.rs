mod stack_integration;
mod store_integration;
mod test_utils;
mod write_behind_integration;
