mod helpers;

mod compaction_tests;
mod iterator_tests;
mod read_tests;
mod write_tests;
