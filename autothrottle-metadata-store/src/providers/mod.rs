pub mod etcd;
pub mod in_memory;
