pub mod check_server;
pub mod init_config;
pub mod purge;
pub mod run;
