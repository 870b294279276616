pub mod continuation;
pub mod extract;
pub mod grounding;
pub mod prompts;
pub mod session;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::llm::{AnswerStream, ChatBackend, GenerationParams, LlmError, Message};
use crate::records::types::{EntityKind, IdentifierSet, LookupMode};
use crate::records::Dataset;

use continuation::SessionUpdate;
use extract::Extraction;
use session::ChatSession;

/// Everything the pipeline produced for one turn, kept for auditing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDetails {
    pub extract_prompt: String,
    /// Raw extractor reply, before decoding.
    pub ids_result: String,
    /// Grounded fact text handed to the answer generator.
    pub combined_info: String,
    pub answer_prompt: String,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Empty when the model produced no fragment at all.
    pub answer: String,
    pub details: PipelineDetails,
}

/// Invoice/order assistant for one conversation.
///
/// Owns its chat session and the identifiers resolved on the previous turn.
/// The dataset is shared read-only between assistants.
pub struct Assistant {
    dataset: Arc<Dataset>,
    session: ChatSession,
    context: IdentifierSet,
}

impl Assistant {
    pub fn new(dataset: Arc<Dataset>, backend: Arc<dyn ChatBackend>) -> Self {
        let session = ChatSession::new(backend, prompts::system_prompt(dataset.mode()));
        Self {
            dataset,
            session,
            context: IdentifierSet::default(),
        }
    }

    /// Identifiers remembered from the last resolved turn.
    pub fn context(&self) -> &IdentifierSet {
        &self.context
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Run extraction, continuation and grounding, then start streaming the
    /// answer. The returned [`PendingAnswer`] must be drained by the caller.
    pub async fn submit_turn(
        &mut self,
        question: &str,
        params: &GenerationParams,
    ) -> Result<PendingAnswer<'_>, LlmError> {
        let mode = self.dataset.mode();

        let extract_prompt = extraction_prompt(&self.dataset, question, &self.context);
        let ids_result = self
            .session
            .send(extract_prompt.clone(), params)
            .await?
            .trim()
            .to_string();

        let extraction = Extraction::decode(mode, &ids_result);
        if let Extraction::ParseError(reason) = &extraction {
            warn!(reason, raw = %ids_result, "extractor reply could not be decoded");
        }

        let resolution = continuation::resolve(&extraction, &self.context);
        if let SessionUpdate::Overwrite(set) = &resolution.update {
            self.context = set.clone();
        }

        let combined_info = grounding::fact_text(&resolution, &self.dataset);
        info!(
            extracted = extraction.identifiers().map_or(0, IdentifierSet::len),
            effective = resolution.effective.len(),
            fact_len = combined_info.len(),
            "identifiers resolved"
        );

        let answer_prompt = prompts::answer_prompt(mode, question, &combined_info);
        let stream = self.session.send_stream(answer_prompt.clone(), params).await?;

        Ok(PendingAnswer {
            session: &mut self.session,
            stream,
            details: PipelineDetails {
                extract_prompt,
                ids_result,
                combined_info,
                answer_prompt,
            },
            answer: String::new(),
            failed: false,
            recorded: false,
        })
    }

    /// Submit a turn and drain the answer without looking at fragments.
    #[cfg(test)]
    pub async fn ask(
        &mut self,
        question: &str,
        params: &GenerationParams,
    ) -> Result<TurnOutcome, LlmError> {
        self.submit_turn(question, params).await?.finish().await
    }
}

/// Answer being streamed for a submitted turn.
///
/// Dropping it before [`PendingAnswer::finish`] succeeds removes the
/// unanswered prompt from the session transcript.
pub struct PendingAnswer<'a> {
    session: &'a mut ChatSession,
    stream: AnswerStream,
    details: PipelineDetails,
    answer: String,
    failed: bool,
    recorded: bool,
}

impl PendingAnswer<'_> {
    pub fn details(&self) -> &PipelineDetails {
        &self.details
    }

    /// Text received so far.
    pub fn partial(&self) -> &str {
        &self.answer
    }

    /// Next fragment, in arrival order. `None` once the stream is exhausted.
    pub async fn next_chunk(&mut self) -> Option<Result<String, LlmError>> {
        let chunk = self.stream.next().await?;
        match &chunk {
            Ok(text) => self.answer.push_str(text),
            Err(_) => self.failed = true,
        }
        Some(chunk)
    }

    /// Give up on this answer; the session forgets the unanswered prompt.
    pub fn abort(self) {
        warn!(partial_len = self.answer.len(), "answer abandoned");
    }

    /// Drain the remaining fragments and record the answer in the session.
    pub async fn finish(mut self) -> Result<TurnOutcome, LlmError> {
        while let Some(chunk) = self.next_chunk().await {
            chunk?;
        }
        if self.failed {
            return Err(LlmError::Interrupted);
        }

        if self.answer.is_empty() {
            warn!("answer stream produced no fragments");
        }
        debug!(answer_len = self.answer.len(), "answer complete");
        self.session.record_reply(self.answer.clone());
        self.recorded = true;

        Ok(TurnOutcome {
            answer: std::mem::take(&mut self.answer),
            details: std::mem::take(&mut self.details),
        })
    }
}

impl Drop for PendingAnswer<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.session.abandon_prompt();
        }
    }
}

/// Stateless variant: one extraction call and one non-streaming answer call,
/// each in a fresh single-message conversation. No continuation.
pub async fn single_shot(
    dataset: &Dataset,
    backend: &dyn ChatBackend,
    question: &str,
    params: &GenerationParams,
) -> Result<TurnOutcome, LlmError> {
    let no_context = IdentifierSet::default();

    let extract_prompt = extraction_prompt(dataset, question, &no_context);
    let ids_result = backend
        .complete(&[Message::user(extract_prompt.clone())], params)
        .await?
        .trim()
        .to_string();

    let extraction = Extraction::decode(dataset.mode(), &ids_result);
    let resolution = continuation::resolve(&extraction, &no_context);
    let combined_info = grounding::fact_text(&resolution, dataset);

    let answer_prompt = prompts::answer_prompt(dataset.mode(), question, &combined_info);
    let answer = backend
        .complete(&[Message::user(answer_prompt.clone())], params)
        .await?
        .trim_end()
        .to_string();

    info!(answer_len = answer.len(), "single-shot answer complete");
    Ok(TurnOutcome {
        answer,
        details: PipelineDetails {
            extract_prompt,
            ids_result,
            combined_info,
            answer_prompt,
        },
    })
}

fn extraction_prompt(dataset: &Dataset, question: &str, prior: &IdentifierSet) -> String {
    let invoice_range = dataset.invoices.id_range();
    match (dataset.mode(), dataset.table(EntityKind::Order)) {
        (LookupMode::InvoicesAndOrders, Some(orders)) => {
            prompts::json_extraction_prompt(question, invoice_range, orders.id_range(), prior)
        }
        _ => prompts::sentinel_extraction_prompt(question, invoice_range, prior),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::records::tests::{invoice_table, order_table};

    enum Reply {
        Text(&'static str),
        Chunks(Vec<&'static str>),
        Fail,
        /// Yields the fragments, then a transport error.
        BreakAfter(Vec<&'static str>),
    }

    /// Backend that replays scripted replies in order and records each request.
    #[derive(Default)]
    struct ScriptedBackend {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<Vec<Message>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn next_reply(&self, messages: &[Message]) -> Reply {
            self.requests.lock().unwrap().push(messages.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected LLM call")
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    fn unavailable() -> LlmError {
        LlmError::Status {
            status: 503,
            body: "overloaded".to_string(),
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(
            &self,
            messages: &[Message],
            _params: &GenerationParams,
        ) -> Result<String, LlmError> {
            match self.next_reply(messages) {
                Reply::Text(t) => Ok(t.to_string()),
                Reply::Chunks(c) => Ok(c.concat()),
                Reply::Fail | Reply::BreakAfter(_) => Err(unavailable()),
            }
        }

        async fn stream(
            &self,
            messages: &[Message],
            _params: &GenerationParams,
        ) -> Result<AnswerStream, LlmError> {
            match self.next_reply(messages) {
                Reply::Text(t) => Ok(AnswerStream::from_chunks([t.to_string()])),
                Reply::Chunks(c) => Ok(AnswerStream::from_chunks(c.into_iter().map(String::from))),
                Reply::Fail => Err(unavailable()),
                Reply::BreakAfter(c) => {
                    let (tx, rx) = mpsc::channel(c.len() + 1);
                    for chunk in c {
                        tx.try_send(Ok(chunk.to_string())).unwrap();
                    }
                    tx.try_send(Err(unavailable())).unwrap();
                    Ok(AnswerStream::new(rx))
                }
            }
        }
    }

    fn both_tables() -> Arc<Dataset> {
        Arc::new(Dataset::new(invoice_table(), Some(order_table())))
    }

    fn invoices_only() -> Arc<Dataset> {
        Arc::new(Dataset::new(invoice_table(), None))
    }

    #[tokio::test]
    async fn test_first_invoice_turn() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text(r#"{"invoices": ["FAC-0001"], "orders": [], "continue": false}"#),
            Reply::Chunks(vec!["La facture FAC-0001 ", "a été payée ", "le 20/01/2024."]),
        ]);
        let mut assistant = Assistant::new(both_tables(), backend.clone());

        let outcome = assistant
            .ask("la première facture", &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(outcome.answer, "La facture FAC-0001 a été payée le 20/01/2024.");
        assert!(outcome.details.extract_prompt.contains("\"la première facture\""));
        assert!(!outcome.details.extract_prompt.contains("précédemment identifié"));
        assert!(outcome
            .details
            .combined_info
            .starts_with("Données de facture numéro: FAC-0001"));
        assert!(outcome.details.answer_prompt.contains(&outcome.details.combined_info));
        assert_eq!(assistant.context(), &IdentifierSet::new(["FAC-0001"], Vec::<String>::new()));

        // system + (extraction prompt, reply) + (answer prompt, reply)
        let transcript = assistant.session().transcript();
        assert_eq!(transcript.len(), 5);
        assert_eq!(transcript[0].role, "system");
        assert_eq!(transcript[4].content, outcome.answer);
    }

    #[tokio::test]
    async fn test_corresponding_order_follow_up() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text(r#"{"invoices": ["FAC-0007"], "orders": [], "continue": false}"#),
            Reply::Text("La facture FAC-0007 est en retard."),
            Reply::Text(r#"{"invoices": [], "orders": ["COM-0007"], "continue": false}"#),
            Reply::Text("La commande COM-0007 est en cours."),
        ]);
        let mut assistant = Assistant::new(both_tables(), backend.clone());
        let params = GenerationParams::default();

        assistant.ask("la facture 7 ?", &params).await.unwrap();
        let outcome = assistant
            .ask("et la commande correspondante ?", &params)
            .await
            .unwrap();

        assert!(outcome.details.extract_prompt.contains("factures : 'FAC-0007'"));
        assert!(outcome
            .details
            .combined_info
            .starts_with("Données de commande numéro: COM-0007"));
        assert!(outcome.details.combined_info.contains("Statut: En cours"));
        assert_eq!(
            assistant.context(),
            &IdentifierSet::new(Vec::<String>::new(), ["COM-0007"])
        );

        // The second extraction request carries the whole first exchange.
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[2].len(), 6);
    }

    #[tokio::test]
    async fn test_continue_reuses_prior_identifiers() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text(r#"{"invoices": ["FAC-0007"], "orders": ["COM-0007"], "continue": false}"#),
            Reply::Text("..."),
            Reply::Text(r#"{"invoices": [], "orders": [], "continue": true}"#),
            Reply::Text("Toujours en retard."),
        ]);
        let mut assistant = Assistant::new(both_tables(), backend);
        let params = GenerationParams::default();

        assistant.ask("FAC-0007 et COM-0007", &params).await.unwrap();
        let outcome = assistant.ask("et leur statut ?", &params).await.unwrap();

        let facts = &outcome.details.combined_info;
        assert!(facts.contains("Données de facture numéro: FAC-0007"));
        assert!(facts.contains("Données de commande numéro: COM-0007"));
        assert_eq!(
            assistant.context(),
            &IdentifierSet::new(["FAC-0007"], ["COM-0007"])
        );
    }

    #[tokio::test]
    async fn test_continue_on_first_turn() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text("CONTINUER"),
            Reply::Text("Je n'ai pas de facture en contexte."),
        ]);
        let mut assistant = Assistant::new(invoices_only(), backend);

        let outcome = assistant
            .ask("et son montant ?", &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(outcome.details.combined_info, grounding::NO_PRIOR_CONTEXT);
        assert!(assistant.context().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_identifier_not_found() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text(r#"{"invoices": ["FAC-12345"], "orders": [], "continue": false}"#),
            Reply::Text("Le paiement de cette facture n'est pas encore finalisé."),
        ]);
        let mut assistant = Assistant::new(both_tables(), backend);

        let outcome = assistant
            .ask("la facture FAC-12345 est-elle payée ?", &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(
            outcome.details.combined_info,
            "Avertissement : Le numéro de facture 'FAC-12345' n'a pas été trouvé.\n"
        );
        assert!(outcome
            .details
            .answer_prompt
            .contains("Indiquez simplement que le paiement ou la livraison n'est pas encore finalisé."));
    }

    #[tokio::test]
    async fn test_unparsable_extraction_still_answers() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text(r#"{"invoices": [FAC-0001"#),
            Reply::Text("Je n'ai pas pu identifier la facture demandée."),
        ]);
        let mut assistant = Assistant::new(both_tables(), backend);

        let outcome = assistant
            .ask("la facture ?", &GenerationParams::default())
            .await
            .unwrap();

        assert!(outcome
            .details
            .combined_info
            .starts_with("Erreur lors de l'extraction des numéros: "));
        assert!(!outcome.answer.is_empty());
        assert!(assistant.context().is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_keeps_previous_context() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text("FAC-0002"),
            Reply::Text("..."),
            Reply::Text("hmm"),
            Reply::Text("..."),
        ]);
        let mut assistant = Assistant::new(invoices_only(), backend);
        let params = GenerationParams::default();

        assistant.ask("facture 2", &params).await.unwrap();
        assistant.ask("???", &params).await.unwrap();

        assert_eq!(
            assistant.context(),
            &IdentifierSet::new(["FAC-0002"], Vec::<String>::new())
        );
    }

    #[tokio::test]
    async fn test_empty_stream_is_not_an_error() {
        let backend = ScriptedBackend::new(vec![Reply::Text("AUCUN"), Reply::Chunks(vec![])]);
        let mut assistant = Assistant::new(invoices_only(), backend);

        let outcome = assistant
            .ask("bonjour", &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(outcome.answer, "");
        assert_eq!(
            outcome.details.combined_info,
            "Aucun numéro de facture trouvé dans la question."
        );
        assert_eq!(assistant.session().transcript().len(), 5);
    }

    #[tokio::test]
    async fn test_extraction_failure_propagates() {
        let backend = ScriptedBackend::new(vec![Reply::Fail]);
        let mut assistant = Assistant::new(invoices_only(), backend.clone());

        let err = assistant
            .ask("facture 1", &GenerationParams::default())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, LlmError::Status { status: 503, .. }));
        assert_eq!(assistant.session().transcript().len(), 1);
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_stream_is_not_recorded() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text("FAC-0001"),
            Reply::BreakAfter(vec!["La facture "]),
        ]);
        let mut assistant = Assistant::new(invoices_only(), backend);

        let mut pending = assistant
            .submit_turn("facture 1", &GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(pending.next_chunk().await.unwrap().unwrap(), "La facture ");
        assert_eq!(pending.partial(), "La facture ");
        let err = pending.finish().await.err().unwrap();
        assert!(matches!(err, LlmError::Status { .. }));

        // Only the extraction exchange remains.
        let transcript = assistant.session().transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[2].content, "FAC-0001");
    }

    #[tokio::test]
    async fn test_abort_forgets_prompt() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text("FAC-0001"),
            Reply::BreakAfter(vec![]),
        ]);
        let mut assistant = Assistant::new(invoices_only(), backend);

        let mut pending = assistant
            .submit_turn("facture 1", &GenerationParams::default())
            .await
            .unwrap();
        assert!(pending.next_chunk().await.unwrap().is_err());
        pending.abort();

        assert_eq!(assistant.session().transcript().len(), 3);
        // The extracted identifiers were still remembered.
        assert_eq!(assistant.context().invoices, vec!["FAC-0001"]);
    }

    #[tokio::test]
    async fn test_dropped_answer_leaves_clean_transcript() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text("FAC-0001"),
            Reply::Chunks(vec!["Payée."]),
            Reply::Text("FAC-0002"),
            Reply::Text("Non payée."),
        ]);
        let mut assistant = Assistant::new(invoices_only(), backend.clone());
        let params = GenerationParams::default();

        let pending = assistant.submit_turn("facture 1", &params).await.unwrap();
        drop(pending);
        assert_eq!(assistant.session().transcript().len(), 3);

        assistant.ask("facture 2", &params).await.unwrap();

        let requests = backend.requests.lock().unwrap();
        let roles: Vec<&str> = requests[2].iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[tokio::test]
    async fn test_malformed_sentinel_identifier_not_found() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text("FAC-0001,FAC-12345"),
            Reply::Text("La facture FAC-0001 est payée."),
        ]);
        let mut assistant = Assistant::new(invoices_only(), backend);

        let outcome = assistant
            .ask("FAC-0001 et FAC-12345 ?", &GenerationParams::default())
            .await
            .unwrap();

        let facts = &outcome.details.combined_info;
        assert!(facts.starts_with("Données de facture numéro: FAC-0001"));
        assert!(facts.ends_with("Avertissement : Le numéro de facture 'FAC-12345' n'a pas été trouvé.\n"));
        assert_eq!(
            assistant.context(),
            &IdentifierSet::new(["FAC-0001", "FAC-12345"], Vec::<String>::new())
        );
    }

    #[tokio::test]
    async fn test_streamed_answer_matches_single_shot() {
        let extraction = r#"{"invoices": ["FAC-0010"], "orders": ["COM-0010"], "continue": false}"#;
        let fragments = vec!["FAC-0010 est partiellement payée", " ; ", "COM-0010 est annulée."];

        let streaming = ScriptedBackend::new(vec![
            Reply::Text(extraction),
            Reply::Chunks(fragments.clone()),
        ]);
        let whole = ScriptedBackend::new(vec![Reply::Text(extraction), Reply::Chunks(fragments)]);
        let params = GenerationParams::default();
        let dataset = both_tables();

        let mut assistant = Assistant::new(dataset.clone(), streaming);
        let streamed = assistant.ask("facture 10 et commande 10", &params).await.unwrap();
        let direct = single_shot(&dataset, whole.as_ref(), "facture 10 et commande 10", &params)
            .await
            .unwrap();

        assert_eq!(streamed.answer, direct.answer);
        assert_eq!(streamed.details, direct.details);
    }

    #[tokio::test]
    async fn test_single_shot_is_stateless() {
        let backend = ScriptedBackend::new(vec![
            Reply::Text("FAC-0001"),
            Reply::Text("Payée.  \n"),
        ]);
        let dataset = invoices_only();

        let outcome = single_shot(&dataset, backend.as_ref(), "facture 1", &GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(outcome.answer, "Payée.");
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.len() == 1 && r[0].role == "user"));
    }
}
