//! Operation envelopes
//!
//! Builds the namespaced XML wrapper for each webservice operation: batch
//! send, processing retrieval, the three identifier queries and the two
//! download requests. Building is purely structural (no I/O) and is
//! deterministic for identical inputs; ids and timestamps are embedded by
//! the caller beforehand. Every envelope declares exactly one namespace at
//! its root, parameterized by the schema version the registry publishes for
//! the operation.

use libxml::tree::Document;

use crate::batch::BatchAccumulator;
use crate::error::{Error, Result};
use crate::ident::Identity;
use crate::registry::{normalize_version, Operation, SchemaRegistry};
use crate::sign::{self, KeyMaterial};
use crate::xml::{self, XmlBuilder};

const ROOT_TAG: &str = "eSocial";

fn namespace_for(operation: Operation, version: &str) -> Result<String> {
    let v = normalize_version(version);
    let ns = match operation {
        Operation::Send => format!("http://www.esocial.gov.br/schema/lote/eventos/envio/v{v}"),
        Operation::Retrieve => format!(
            "http://www.esocial.gov.br/schema/lote/eventos/envio/consulta/retornoProcessamento/v{v}"
        ),
        Operation::QueryEmployerEvents => format!(
            "http://www.esocial.gov.br/schema/consulta/identificadores-eventos/empregador/v{v}"
        ),
        Operation::QueryTableEvents => {
            format!("http://www.esocial.gov.br/schema/consulta/identificadores-eventos/tabela/v{v}")
        }
        Operation::QueryWorkerEvents => format!(
            "http://www.esocial.gov.br/schema/consulta/identificadores-eventos/trabalhador/v{v}"
        ),
        Operation::DownloadById => {
            format!("http://www.esocial.gov.br/schema/download/solicitacao/id/v{v}")
        }
        Operation::DownloadByReceipt => {
            format!("http://www.esocial.gov.br/schema/download/solicitacao/nrRecibo/v{v}")
        }
        other => {
            return Err(Error::MalformedInput(format!(
                "operation {other:?} has no request envelope"
            )))
        }
    };
    Ok(ns)
}

/// Builder of operation envelopes over one schema registry (which supplies
/// the per-operation schema versions embedded in namespace URIs).
pub struct EnvelopeBuilder<'r> {
    registry: &'r SchemaRegistry,
}

impl<'r> EnvelopeBuilder<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    fn start(&self, operation: Operation) -> Result<XmlBuilder> {
        let ns = namespace_for(operation, self.registry.operation_version(operation))?;
        XmlBuilder::new(ROOT_TAG, &[&ns])
    }

    fn identity_block(
        &self,
        builder: &mut XmlBuilder,
        parent: &str,
        tag: &str,
        identity: &Identity,
    ) -> Result<()> {
        builder.add(Some(parent), tag, None, &[])?;
        let path = format!("{parent}/{tag}");
        builder.add(
            Some(&path),
            "tpInsc",
            Some(&identity.kind.code().to_string()),
            &[],
        )?;
        builder.add(Some(&path), "nrInsc", Some(identity.effective_number()), &[])?;
        Ok(())
    }

    /// `envioLoteEventos`: wrap the accumulated batch for dispatch.
    ///
    /// Signed events are imported into the `eventos` element in insertion
    /// order, each inside an `evento` holder carrying its id. An empty batch
    /// produces an empty `eventos` element, representationally valid
    /// though upstream business rules reject it.
    pub fn send_batch(
        &self,
        group: u8,
        employer: &Identity,
        sender: &Identity,
        batch: &BatchAccumulator,
    ) -> Result<Document> {
        let mut builder = self.start(Operation::Send)?;
        builder.add(
            None,
            "envioLoteEventos",
            None,
            &[("grupo", &group.to_string())],
        )?;
        self.identity_block(&mut builder, "envioLoteEventos", "ideEmpregador", employer)?;
        self.identity_block(&mut builder, "envioLoteEventos", "ideTransmissor", sender)?;
        builder.add(Some("envioLoteEventos"), "eventos", None, &[])?;
        for event in batch.events() {
            let mut holder = builder.add(
                Some("envioLoteEventos/eventos"),
                "evento",
                None,
                &[("Id", &event.id)],
            )?;
            let event_root = xml::root_element(&event.document)?;
            xml::graft(builder.document(), &mut holder, &event_root)?;
        }
        Ok(builder.into_document())
    }

    /// `consultaLoteEventos`: query batch processing results by protocol.
    pub fn retrieve(&self, protocol_number: &str) -> Result<Document> {
        let mut builder = self.start(Operation::Retrieve)?;
        builder.add(None, "consultaLoteEventos", None, &[])?;
        builder.add(
            Some("consultaLoteEventos"),
            "protocoloEnvio",
            Some(protocol_number),
            &[],
        )?;
        Ok(builder.into_document())
    }

    /// `consultaEvtsEmpregador`: employer event ids for one period.
    pub fn query_employer_events(
        &self,
        employer: &Identity,
        event_type: &str,
        period: &str,
    ) -> Result<Document> {
        let mut builder = self.start(Operation::QueryEmployerEvents)?;
        builder.add(None, "consultaIdentificadoresEvts", None, &[])?;
        self.identity_block(
            &mut builder,
            "consultaIdentificadoresEvts",
            "ideEmpregador",
            employer,
        )?;
        builder.add(
            Some("consultaIdentificadoresEvts"),
            "consultaEvtsEmpregador",
            None,
            &[],
        )?;
        let path = "consultaIdentificadoresEvts/consultaEvtsEmpregador";
        builder.add(Some(path), "tpEvt", Some(event_type), &[])?;
        builder.add(Some(path), "perApur", Some(period), &[])?;
        Ok(builder.into_document())
    }

    /// `consultaEvtsTabela`: table event ids, optionally keyed and bounded.
    pub fn query_table_events(
        &self,
        employer: &Identity,
        event_type: &str,
        key: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Document> {
        let mut builder = self.start(Operation::QueryTableEvents)?;
        builder.add(None, "consultaIdentificadoresEvts", None, &[])?;
        self.identity_block(
            &mut builder,
            "consultaIdentificadoresEvts",
            "ideEmpregador",
            employer,
        )?;
        builder.add(
            Some("consultaIdentificadoresEvts"),
            "consultaEvtsTabela",
            None,
            &[],
        )?;
        let path = "consultaIdentificadoresEvts/consultaEvtsTabela";
        builder.add(Some(path), "tpEvt", Some(event_type), &[])?;
        if let Some(key) = key {
            builder.add(Some(path), "chEvt", Some(key), &[])?;
        }
        if let Some(from) = from {
            builder.add(Some(path), "dtIni", Some(from), &[])?;
        }
        if let Some(to) = to {
            builder.add(Some(path), "dtFim", Some(to), &[])?;
        }
        Ok(builder.into_document())
    }

    /// `consultaEvtsTrabalhador`: worker event ids inside a date window.
    pub fn query_worker_events(
        &self,
        employer: &Identity,
        worker_cpf: &str,
        from: &str,
        to: &str,
    ) -> Result<Document> {
        let mut builder = self.start(Operation::QueryWorkerEvents)?;
        builder.add(None, "consultaIdentificadoresEvts", None, &[])?;
        self.identity_block(
            &mut builder,
            "consultaIdentificadoresEvts",
            "ideEmpregador",
            employer,
        )?;
        builder.add(
            Some("consultaIdentificadoresEvts"),
            "consultaEvtsTrabalhador",
            None,
            &[],
        )?;
        let path = "consultaIdentificadoresEvts/consultaEvtsTrabalhador";
        builder.add(Some(path), "cpfTrab", Some(worker_cpf), &[])?;
        builder.add(Some(path), "dtIni", Some(from), &[])?;
        builder.add(Some(path), "dtFim", Some(to), &[])?;
        Ok(builder.into_document())
    }

    /// `solicDownloadEvtsPorId`: download events by id. The request itself
    /// is signed.
    pub fn download_by_id(
        &self,
        employer: &Identity,
        ids: &[&str],
        key_material: &KeyMaterial,
    ) -> Result<Document> {
        if ids.is_empty() {
            return Err(Error::MalformedInput(
                "download request needs at least one event id".into(),
            ));
        }
        let mut builder = self.start(Operation::DownloadById)?;
        builder.add(None, "download", None, &[])?;
        self.identity_block(&mut builder, "download", "ideEmpregador", employer)?;
        builder.add(Some("download"), "solicDownloadEvtsPorId", None, &[])?;
        for id in ids {
            builder.add(
                Some("download/solicDownloadEvtsPorId"),
                "id",
                Some(id),
                &[],
            )?;
        }
        sign::sign(&builder.into_document(), key_material)
    }

    /// `solicDownloadEventosPorNrRecibo`: download events by receipt
    /// number. The request itself is signed.
    pub fn download_by_receipt(
        &self,
        employer: &Identity,
        receipts: &[&str],
        key_material: &KeyMaterial,
    ) -> Result<Document> {
        if receipts.is_empty() {
            return Err(Error::MalformedInput(
                "download request needs at least one receipt number".into(),
            ));
        }
        let mut builder = self.start(Operation::DownloadByReceipt)?;
        builder.add(None, "download", None, &[])?;
        self.identity_block(&mut builder, "download", "ideEmpregador", employer)?;
        builder.add(
            Some("download"),
            "solicDownloadEventosPorNrRecibo",
            None,
            &[],
        )?;
        for receipt in receipts {
            builder.add(
                Some("download/solicDownloadEventosPorNrRecibo"),
                "nrRec",
                Some(receipt),
                &[],
            )?;
        }
        sign::sign(&builder.into_document(), key_material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::RegistrationKind;
    use crate::xml::{default_ns_href, find_descendant, find_descendants, root_element};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new("/nonexistent", "S-1.0")
    }

    fn employer() -> Identity {
        Identity::new(RegistrationKind::Cnpj, "12345678901234").unwrap()
    }

    const RETRIEVE_NS: &str =
        "http://www.esocial.gov.br/schema/lote/eventos/envio/consulta/retornoProcessamento/v1_0_0";
    const SEND_NS: &str = "http://www.esocial.gov.br/schema/lote/eventos/envio/v1_1_1";

    #[test]
    fn test_retrieve_envelope_shape() {
        let registry = registry();
        let doc = EnvelopeBuilder::new(&registry)
            .retrieve("1.2.202109.0000000000000000001")
            .unwrap();
        let root = root_element(&doc).unwrap();
        assert_eq!(root.get_name(), "eSocial");
        assert_eq!(default_ns_href(&root).as_deref(), Some(RETRIEVE_NS));
        let protocol = find_descendant(&root, "protocoloEnvio", RETRIEVE_NS).unwrap();
        assert_eq!(protocol.get_content(), "1.2.202109.0000000000000000001");
    }

    #[test]
    fn test_empty_send_envelope_has_empty_eventos() {
        let registry = registry();
        let batch = BatchAccumulator::new();
        let doc = EnvelopeBuilder::new(&registry)
            .send_batch(1, &employer(), &employer(), &batch)
            .unwrap();
        let root = root_element(&doc).unwrap();
        let envio = find_descendant(&root, "envioLoteEventos", SEND_NS).unwrap();
        assert_eq!(envio.get_attribute("grupo").as_deref(), Some("1"));
        let eventos = find_descendant(&root, "eventos", SEND_NS).unwrap();
        assert!(eventos.get_child_elements().is_empty());
    }

    #[test]
    fn test_send_envelope_identity_order_and_truncation() {
        let registry = registry();
        let batch = BatchAccumulator::new();
        let doc = EnvelopeBuilder::new(&registry)
            .send_batch(1, &employer(), &employer(), &batch)
            .unwrap();
        let root = root_element(&doc).unwrap();
        let ide = find_descendant(&root, "ideEmpregador", SEND_NS).unwrap();
        let children = ide.get_child_elements();
        assert_eq!(children[0].get_name(), "tpInsc");
        assert_eq!(children[0].get_content(), "1");
        assert_eq!(children[1].get_name(), "nrInsc");
        assert_eq!(children[1].get_content(), "12345678");
    }

    #[test]
    fn test_query_worker_envelope_shape() {
        let registry = registry();
        let ns =
            "http://www.esocial.gov.br/schema/consulta/identificadores-eventos/trabalhador/v1_0_0";
        let doc = EnvelopeBuilder::new(&registry)
            .query_worker_events(&employer(), "12345678901", "2021-01-01", "2021-01-31")
            .unwrap();
        let root = root_element(&doc).unwrap();
        assert_eq!(default_ns_href(&root).as_deref(), Some(ns));
        let cpf = find_descendant(&root, "cpfTrab", ns).unwrap();
        assert_eq!(cpf.get_content(), "12345678901");
        assert!(find_descendant(&root, "dtIni", ns).is_some());
        assert!(find_descendant(&root, "dtFim", ns).is_some());
    }

    #[test]
    fn test_query_table_optional_fields_absent() {
        let registry = registry();
        let ns = "http://www.esocial.gov.br/schema/consulta/identificadores-eventos/tabela/v1_0_0";
        let doc = EnvelopeBuilder::new(&registry)
            .query_table_events(&employer(), "S-1010", None, None, None)
            .unwrap();
        let root = root_element(&doc).unwrap();
        assert!(find_descendant(&root, "tpEvt", ns).is_some());
        assert!(find_descendant(&root, "chEvt", ns).is_none());
        assert!(find_descendant(&root, "dtIni", ns).is_none());
    }

    #[test]
    fn test_download_by_id_is_signed() {
        let registry = registry();
        let key = crate::sign::tests_support::material();
        let ns = "http://www.esocial.gov.br/schema/download/solicitacao/id/v1_0_0";
        let doc = EnvelopeBuilder::new(&registry)
            .download_by_id(
                &employer(),
                &["ID1123456780000002021091617310600001"],
                &key,
            )
            .unwrap();
        let root = root_element(&doc).unwrap();
        let ids = find_descendants(&root, "id", ns);
        assert_eq!(ids.len(), 1);
        assert!(find_descendant(&root, "Signature", crate::sign::DSIG_NS).is_some());
    }

    #[test]
    fn test_download_requires_at_least_one_id() {
        let registry = registry();
        let key = crate::sign::tests_support::material();
        let err = EnvelopeBuilder::new(&registry)
            .download_by_id(&employer(), &[], &key)
            .err()
            .unwrap();
        assert!(matches!(err, Error::MalformedInput(_)));
    }
}
