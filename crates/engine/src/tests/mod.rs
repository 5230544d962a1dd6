mod helpers;

mod batch_tests;
mod concurrency_tests;
mod recovery_tests;
