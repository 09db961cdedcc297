pub mod mount;
pub mod unmount;
pub mod validate;
