pub mod vector;
pub mod similarity;
pub mod object;
