//! Text-side analysis of decompiled Python source.

pub mod scan;
pub mod syntax;
