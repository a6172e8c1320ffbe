//! # Backbone Model Families

pub mod resnet;
