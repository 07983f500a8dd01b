pub mod c14n;
pub mod document;

pub use c14n::C14nMethod;
pub use document::{NodePath, XmlDocument, XmlElement, XmlNode};
