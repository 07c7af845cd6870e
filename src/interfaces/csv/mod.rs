pub mod sweep_writer;
