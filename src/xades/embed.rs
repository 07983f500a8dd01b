//! Document embedder: enveloped placement of the assembled signature.

use crate::error::{SignError, SignResult};
use crate::xml::document::{NodePath, XmlDocument, XmlElement, XmlNode};

/// Append `signature` as the last child of the element at `target`.
///
/// Runs strictly after digesting: the reference digest was computed with
/// the signature absent, so insertion must never happen earlier, and
/// nothing here re-canonicalizes or touches the signature bytes.
pub fn embed(
    document: &mut XmlDocument,
    target: &NodePath,
    signature: XmlElement,
) -> SignResult<()> {
    let element = document
        .element_mut(target)
        .ok_or_else(|| SignError::ElementNotFound("stale signing target path".into()))?;
    element.children.push(XmlNode::Element(signature));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_lands_as_last_child() {
        let mut doc = XmlDocument::parse(r#"<factura id="F1"><total>10</total></factura>"#).unwrap();
        let signature = XmlElement::new("ds:Signature")
            .with_attr("xmlns:ds", "http://www.w3.org/2000/09/xmldsig#");
        embed(&mut doc, &vec![], signature).unwrap();

        match doc.root().children.last() {
            Some(XmlNode::Element(e)) => assert_eq!(e.name, "ds:Signature"),
            other => panic!("expected signature element, got {other:?}"),
        }
        assert_eq!(doc.root().children.len(), 2);
    }

    #[test]
    fn stale_path_is_rejected() {
        let mut doc = XmlDocument::parse("<a/>").unwrap();
        let err = embed(&mut doc, &vec![7], XmlElement::new("ds:Signature")).unwrap_err();
        assert!(matches!(err, SignError::ElementNotFound(_)));
    }
}
