mod disk_writer_tests;
mod helpers;
