//! Response decoding
//!
//! Turns the heterogeneous XML the webservice returns (batch receipt,
//! per-event processing status, per-event receipt) into one uniform
//! structure with optional blocks. Decoding is a structural traversal by
//! element local names inside the response's declared namespace; absent
//! blocks stay unset instead of failing.

use libxml::tree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::xml;

/// Response code, free-text description and structured occurrence errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub code: Option<String>,
    pub description: Option<String>,
    pub occurrences: Vec<Occurrence>,
}

/// One structured occurrence error inside a status block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub code: Option<String>,
    pub description: Option<String>,
    pub kind: Option<String>,
    pub location: Option<String>,
}

/// Batch reception data: when it arrived and under which protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReception {
    pub received_at: Option<String>,
    pub application_version: Option<String>,
    pub protocol_number: Option<String>,
}

/// Per-event processing outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub code: Option<String>,
    pub description: Option<String>,
    pub application_version: Option<String>,
    pub processed_at: Option<String>,
    pub occurrences: Vec<Occurrence>,
}

/// Per-event receipt. The contributor-info sub-block the service includes
/// is redundant with the request's own identity and is not decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub number: Option<String>,
    pub hash: Option<String>,
}

/// Result of one submitted event inside a retrieval response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub id: Option<String>,
    pub processing: Option<ProcessingStatus>,
    pub receipt: Option<Receipt>,
}

/// Uniform decoded response. Blocks a given operation does not produce are
/// simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedResponse {
    pub status: Option<ResponseStatus>,
    pub batch: Option<BatchReception>,
    pub events: Vec<EventOutcome>,
}

fn child_text(parent: &Node, local_name: &str, ns: &str) -> Option<String> {
    parent
        .get_child_elements()
        .into_iter()
        .find(|c| {
            c.get_name() == local_name
                && xml::default_ns_href(c).as_deref() == Some(ns)
        })
        .map(|c| c.get_content())
}

fn decode_occurrences(container: &Node, ns: &str) -> Vec<Occurrence> {
    let mut occurrences = Vec::new();
    for block in xml::find_descendants(container, "ocorrencias", ns) {
        for item in block.get_child_elements() {
            occurrences.push(Occurrence {
                code: child_text(&item, "codigo", ns),
                description: child_text(&item, "descricao", ns),
                kind: child_text(&item, "tipo", ns),
                location: child_text(&item, "localizacao", ns),
            });
        }
    }
    occurrences
}

fn decode_status(node: &Node, ns: &str) -> ResponseStatus {
    ResponseStatus {
        code: child_text(node, "cdResposta", ns),
        description: child_text(node, "descResposta", ns),
        occurrences: decode_occurrences(node, ns),
    }
}

fn decode_processing(node: &Node, ns: &str) -> ProcessingStatus {
    ProcessingStatus {
        code: child_text(node, "cdResposta", ns),
        description: child_text(node, "descResposta", ns),
        application_version: child_text(node, "versaoAppProcessamento", ns),
        processed_at: child_text(node, "dhProcessamento", ns),
        occurrences: decode_occurrences(node, ns),
    }
}

fn decode_receipt(node: &Node, ns: &str) -> Receipt {
    Receipt {
        number: child_text(node, "nrRecibo", ns),
        hash: child_text(node, "hash", ns),
    }
}

fn decode_outcome(evento: &Node) -> EventOutcome {
    let mut outcome = EventOutcome {
        id: evento.get_attribute("Id"),
        ..Default::default()
    };
    // evento → retornoEvento → nested eSocial document, which declares its
    // own namespace; lookups below follow that inner namespace.
    for retorno in evento.get_child_elements() {
        for inner in retorno.get_child_elements() {
            let Some(inner_ns) = xml::default_ns_href(&inner) else {
                continue;
            };
            if let Some(node) = xml::find_descendant(&inner, "processamento", &inner_ns) {
                outcome.processing = Some(decode_processing(&node, &inner_ns));
            }
            if let Some(node) = xml::find_descendant(&inner, "recibo", &inner_ns) {
                outcome.receipt = Some(decode_receipt(&node, &inner_ns));
            }
        }
    }
    outcome
}

/// Decode a response document into the uniform result structure.
pub fn decode(doc: &Document) -> Result<DecodedResponse> {
    let root = xml::root_element(doc)?;
    let ns = xml::default_ns_href(&root).ok_or_else(|| {
        Error::MalformedInput("response root declares no default namespace".into())
    })?;

    let mut response = DecodedResponse::default();

    if let Some(status) = xml::find_descendant(&root, "status", &ns) {
        response.status = Some(decode_status(&status, &ns));
    }
    if let Some(reception) = xml::find_descendant(&root, "dadosRecepcaoLote", &ns) {
        response.batch = Some(BatchReception {
            received_at: child_text(&reception, "dhRecepcao", &ns),
            application_version: child_text(&reception, "versaoAplicativoRecepcao", &ns),
            protocol_number: child_text(&reception, "protocoloEnvio", &ns),
        });
    }
    for evento in xml::find_descendants(&root, "evento", &ns) {
        response.events.push(decode_outcome(&evento));
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::load_fromstring;

    const SEND_RETURN: &str = concat!(
        r#"<eSocial xmlns="http://www.esocial.gov.br/schema/lote/eventos/envio/retornoEnvio/v1_1_0">"#,
        r#"<retornoEnvioLoteEventos>"#,
        r#"<status><cdResposta>201</cdResposta><descResposta>Lote recebido com sucesso.</descResposta></status>"#,
        r#"<dadosRecepcaoLote>"#,
        r#"<dhRecepcao>2021-09-16T17:31:06.837</dhRecepcao>"#,
        r#"<versaoAplicativoRecepcao>6.4.1</versaoAplicativoRecepcao>"#,
        r#"<protocoloEnvio>1.1.202109.0000000000011111111</protocoloEnvio>"#,
        r#"</dadosRecepcaoLote>"#,
        r#"</retornoEnvioLoteEventos>"#,
        r#"</eSocial>"#
    );

    #[test]
    fn test_decode_send_return() {
        let doc = load_fromstring(SEND_RETURN).unwrap();
        let decoded = decode(&doc).unwrap();

        let status = decoded.status.unwrap();
        assert_eq!(status.code.as_deref(), Some("201"));
        assert_eq!(
            status.description.as_deref(),
            Some("Lote recebido com sucesso.")
        );
        assert!(status.occurrences.is_empty());

        let batch = decoded.batch.unwrap();
        assert_eq!(batch.received_at.as_deref(), Some("2021-09-16T17:31:06.837"));
        assert_eq!(
            batch.protocol_number.as_deref(),
            Some("1.1.202109.0000000000011111111")
        );
        assert!(decoded.events.is_empty());
    }

    #[test]
    fn test_decode_status_occurrences() {
        let xml = concat!(
            r#"<eSocial xmlns="urn:ret"><retornoEnvioLoteEventos>"#,
            r#"<status><cdResposta>402</cdResposta><descResposta>Lote incorreto.</descResposta>"#,
            r#"<ocorrencias>"#,
            r#"<ocorrencia><codigo>105</codigo><descricao>Schema invalido.</descricao><tipo>1</tipo><localizacao>/eSocial</localizacao></ocorrencia>"#,
            r#"<ocorrencia><codigo>301</codigo><descricao>Assinatura invalida.</descricao><tipo>1</tipo></ocorrencia>"#,
            r#"</ocorrencias></status>"#,
            r#"</retornoEnvioLoteEventos></eSocial>"#
        );
        let doc = load_fromstring(xml).unwrap();
        let decoded = decode(&doc).unwrap();
        let status = decoded.status.unwrap();
        assert_eq!(status.code.as_deref(), Some("402"));
        assert_eq!(status.occurrences.len(), 2);
        assert_eq!(status.occurrences[0].code.as_deref(), Some("105"));
        assert_eq!(
            status.occurrences[0].location.as_deref(),
            Some("/eSocial")
        );
        assert_eq!(status.occurrences[1].code.as_deref(), Some("301"));
        assert!(status.occurrences[1].location.is_none());
        assert!(decoded.batch.is_none());
    }

    #[test]
    fn test_decode_retrieval_with_event_outcomes() {
        let xml = concat!(
            r#"<eSocial xmlns="urn:proc"><retornoProcessamentoLoteEventos>"#,
            r#"<status><cdResposta>201</cdResposta><descResposta>OK</descResposta></status>"#,
            r#"<retornoEventos>"#,
            r#"<evento Id="ID1123456780000002021091617310600001">"#,
            r#"<retornoEvento>"#,
            r#"<eSocial xmlns="urn:evt-ret"><retornoEvento>"#,
            r#"<processamento><cdResposta>201</cdResposta><descResposta>Sucesso.</descResposta>"#,
            r#"<versaoAppProcessamento>9.1</versaoAppProcessamento>"#,
            r#"<dhProcessamento>2021-09-16T17:32:00.000</dhProcessamento></processamento>"#,
            r#"<recibo><nrRecibo>1.1.0000000000111111111</nrRecibo><hash>q29tcHV0ZWQ=</hash>"#,
            r#"<infoContribuinte><nmRazao>ignored</nmRazao></infoContribuinte></recibo>"#,
            r#"</retornoEvento></eSocial>"#,
            r#"</retornoEvento>"#,
            r#"</evento>"#,
            r#"</retornoEventos>"#,
            r#"</retornoProcessamentoLoteEventos></eSocial>"#
        );
        let doc = load_fromstring(xml).unwrap();
        let decoded = decode(&doc).unwrap();

        assert_eq!(decoded.events.len(), 1);
        let outcome = &decoded.events[0];
        assert_eq!(
            outcome.id.as_deref(),
            Some("ID1123456780000002021091617310600001")
        );
        let processing = outcome.processing.as_ref().unwrap();
        assert_eq!(processing.code.as_deref(), Some("201"));
        assert_eq!(processing.processed_at.as_deref(), Some("2021-09-16T17:32:00.000"));
        let receipt = outcome.receipt.as_ref().unwrap();
        assert_eq!(receipt.number.as_deref(), Some("1.1.0000000000111111111"));
        assert_eq!(receipt.hash.as_deref(), Some("q29tcHV0ZWQ="));
    }

    #[test]
    fn test_decode_tolerates_missing_blocks() {
        let doc = load_fromstring(r#"<eSocial xmlns="urn:ret"><retorno/></eSocial>"#).unwrap();
        let decoded = decode(&doc).unwrap();
        assert!(decoded.status.is_none());
        assert!(decoded.batch.is_none());
        assert!(decoded.events.is_empty());
    }

    #[test]
    fn test_root_without_namespace_is_malformed() {
        let doc = load_fromstring("<eSocial><status/></eSocial>").unwrap();
        assert!(matches!(
            decode(&doc).unwrap_err(),
            Error::MalformedInput(_)
        ));
    }
}
