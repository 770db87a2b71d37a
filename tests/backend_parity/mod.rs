pub mod helpers;

pub mod attention;
