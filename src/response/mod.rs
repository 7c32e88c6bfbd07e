pub mod res;
