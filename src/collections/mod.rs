pub mod skip_list;
