pub mod h2frame;
