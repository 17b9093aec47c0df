pub mod onnx;
pub mod embed;
pub mod matcher;
