mod common;
mod http_tests;
mod pipeline_tests;
