pub mod cluster_controller;
pub mod common;
pub mod component;
pub mod computenode;
pub mod datanode;
pub mod fileservice;
pub mod logservice;
pub mod orchestrator;
pub mod proxy;
pub mod script;
pub mod webui;
