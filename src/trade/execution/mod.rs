pub mod gateway_box;
