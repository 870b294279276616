//! Prompt templates. The datasets and their users are French, so every
//! instruction sent to the model is French as well.

use crate::records::types::{EntityKind, IdentifierSet, LookupMode};

/// Sentinel meaning "no identifier in the question".
pub const NONE_SENTINEL: &str = "AUCUN";
/// Sentinel meaning "same items as the previous turn".
pub const CONTINUE_SENTINEL: &str = "CONTINUER";

/// Seeds every conversation; tells the model its role and the domain vocabulary.
pub fn system_prompt(mode: LookupMode) -> String {
    let mut prompt = String::from(
        "Vous êtes un assistant IA expert en analyse de factures",
    );
    match mode {
        LookupMode::InvoicesOnly => prompt.push_str(
            " d'entreprise.\n\
             Votre rôle est d'aider l'utilisateur à obtenir des informations précises sur les factures,\n\
             en utilisant exclusivement les données fournies par le système.\n\n\
             Vous pouvez répondre à des questions concernant:\n\
             - Les détails spécifiques d'une facture (montant, date, statut, etc.)\n\
             - Les comparaisons entre plusieurs factures\n\
             - Les calculs simples sur les données fournies\n\n",
        ),
        LookupMode::InvoicesAndOrders => prompt.push_str(
            " et commandes d'entreprise.\n\
             Votre rôle est d'aider l'utilisateur à obtenir des informations précises sur les factures et les commandes,\n\
             en utilisant exclusivement les données fournies par le système.\n\n\
             Vous pouvez répondre à des questions concernant:\n\
             - Les détails spécifiques d'une facture ou d'une commande (montant, date, statut, etc.)\n\
             - Les relations entre factures et commandes (chaque facture FAC-XXXX a une commande associée COM-XXXX)\n\
             - Les comparaisons entre plusieurs factures/commandes\n\
             - Les calculs simples sur les données fournies\n\n",
        ),
    }
    prompt.push_str(
        "Utilisez uniquement les données fournies et restez factuel. N'utilisez aucune connaissance externe et ne faites pas d'hypothèses.\n\
         Soyez concis et précis dans vos réponses.\n\n",
    );
    prompt.push_str(&vocabulary(mode));
    prompt.push_str(&finalization_rules(mode));
    prompt
}

/// Extraction prompt for the invoice-only protocol: a comma list, `AUCUN` or `CONTINUER`.
pub fn sentinel_extraction_prompt(question: &str, range: (u32, u32), prior: &IdentifierSet) -> String {
    let kind = EntityKind::Invoice;
    let (lo, hi) = range;
    let first: Vec<String> = (lo..=hi).take(5).map(|n| kind.format_id(n)).collect();
    let mut last: Vec<String> = (lo..=hi).rev().take(5).map(|n| kind.format_id(n)).collect();
    last.reverse();

    let mut prompt = format!(
        "Vous êtes un assistant serviable conçu pour extraire les numéros de facture des questions de l'utilisateur.\n\
         Veuillez extraire tous les numéros de facture mentionnés dans la question suivante, même s'ils sont mentionnés de manière informelle ou contiennent des erreurs de frappe.\n\
         Les numéros de facture commencent par '{prefix}-' suivi de quatre chiffres, et sont compris entre {min} et {max}.\n\
         Si une plage de factures est mentionnée, veuillez extraire tous les numéros de facture pertinents.\n\
         Par exemple:\n\
         \x20   - \"la première facture\" doit retourner '{min}'\n\
         \x20   - \"les 5 premières factures\" doit retourner '{first}'\n\
         \x20   - \"les 5 dernières factures\" doit retourner '{last}'\n\
         Si plusieurs numéros de facture sont présents, séparez-les par des virgules.\n\
         Si aucun numéro de facture n'est trouvé, veuillez répondre par '{none}'.\n\
         N'incluez aucune description ou contexte supplémentaire.\n",
        prefix = kind.prefix(),
        min = kind.format_id(lo),
        max = kind.format_id(hi),
        first = first.join(","),
        last = last.join(","),
        none = NONE_SENTINEL,
    );

    if !prior.invoices.is_empty() {
        prompt.push_str(&format!(
            "Sachant que vous avez précédemment identifié les numéros suivants : factures : '{}'.\n\
             Si la question actuelle se réfère à ces mêmes éléments, et qu'aucun nouveau numéro n'est explicitement mentionné, veuillez répondre par le mot clé '{}'.\n",
            prior.invoices.join(","),
            CONTINUE_SENTINEL,
        ));
    }

    prompt.push_str(&format!("\nQuestion: {}", question));
    prompt
}

/// Extraction prompt for the invoice + order protocol (JSON output).
pub fn json_extraction_prompt(
    question: &str,
    invoice_range: (u32, u32),
    order_range: (u32, u32),
    prior: &IdentifierSet,
) -> String {
    let inv = EntityKind::Invoice;
    let ord = EntityKind::Order;

    let mut prompt = format!(
        "Veuillez extraire tous les numéros de facture ('{inv_prefix}-' suivi de quatre chiffres, entre {inv_min} et {inv_max})\n\
         ET/OU tous les numéros de commande ('{ord_prefix}-' suivi de quatre chiffres, entre {ord_min} et {ord_max}) mentionnés dans cette question: \"{question}\".\n\
         Gérez les mentions informelles et les erreurs de frappe.\n\
         Si une plage est indiquée, extrayez tous les numéros pertinents (\"les 5 dernières factures\" désigne les 5 numéros les plus élevés).\n\n\
         Format de sortie JSON (sans autres explications):\n\
         {{\n\
         \x20 \"invoices\": [\"FAC-XXXX\", \"FAC-YYYY\"] ou [] si aucune facture,\n\
         \x20 \"orders\": [\"COM-XXXX\", \"COM-YYYY\"] ou [] si aucune commande,\n\
         \x20 \"continue\": true ou false (true seulement si la question se réfère aux items précédents sans en mentionner de nouveaux)\n\
         }}\n\n\
         Exemples d'extraction:\n\
         - 'la première facture' -> {{\"invoices\": [\"{inv_min}\"], \"orders\": [], \"continue\": false}}\n\
         - 'la première commande' -> {{\"invoices\": [], \"orders\": [\"{ord_min}\"], \"continue\": false}}\n\
         - 'montant de la facture {inv_min} et commande {ord_min}' -> {{\"invoices\": [\"{inv_min}\"], \"orders\": [\"{ord_min}\"], \"continue\": false}}\n\
         - 'détails sur la facture précédente' (avec contexte précédent) -> {{\"invoices\": [], \"orders\": [], \"continue\": true}}\n\
         Chaque commande COM-XXXX est associée à la facture FAC-XXXX de même numéro: 'la commande correspondante' à la facture {inv_example} désigne {ord_example}.\n",
        inv_prefix = inv.prefix(),
        inv_min = inv.format_id(invoice_range.0),
        inv_max = inv.format_id(invoice_range.1),
        ord_prefix = ord.prefix(),
        ord_min = ord.format_id(order_range.0),
        ord_max = ord.format_id(order_range.1),
        inv_example = inv.format_id(7),
        ord_example = ord.format_id(7),
        question = question,
    );

    if !prior.is_empty() {
        let mut previous = Vec::new();
        if !prior.invoices.is_empty() {
            previous.push(format!("factures : '{}'", prior.invoices.join(",")));
        }
        if !prior.orders.is_empty() {
            previous.push(format!("commandes : '{}'", prior.orders.join(",")));
        }
        prompt.push_str(&format!(
            "Sachant que vous avez précédemment identifié les numéros suivants : {}.\n\
             Si la question actuelle se réfère à ces mêmes éléments, et qu'aucun nouveau numéro n'est explicitement mentionné, veuillez répondre avec \"continue\": true.\n\
             Signaux de nouvelle requête (non exhaustif):\n\
             - Mention explicite de 'nouvelle facture', 'autre facture', 'nouvelle commande', 'autre commande'.\n\
             - Présence d'un format de numéro différent.\n\
             - Question clairement hors du contexte des items précédents.",
            previous.join(", ")
        ));
    }

    prompt
}

/// Final answer prompt: the question plus the grounded facts, verbatim.
pub fn answer_prompt(mode: LookupMode, question: &str, facts: &str) -> String {
    let subject = match mode {
        LookupMode::InvoicesOnly => "factures",
        LookupMode::InvoicesAndOrders => "factures et de commandes",
    };
    let mut prompt = format!(
        "Vous êtes un assistant IA expert en analyse de {subject}. Votre rôle est de répondre aux questions posées, en utilisant exclusivement les données fournies.\n\
         **Question:**\n\
         {question}\n\
         **Données Fournies:**\n\
         {facts}\n\n\
         Répondez à la question de manière très concise et précise, en utilisant uniquement les données fournies ci-dessus.\n\
         N'utilisez aucune connaissance externe et ne faites pas d'hypothèses.\n\
         Si la question nécessite des calculs, assurez-vous d'être précis et présentez les étapes importantes clairement.\n\n",
    );
    prompt.push_str(&vocabulary(mode));
    if mode == LookupMode::InvoicesAndOrders {
        prompt.push_str(
            "Notez que chaque commande (COM-XXXX) est associée à une facture (FAC-XXXX) avec le même numéro (par exemple, COM-0001 correspond à FAC-0001).\n\n",
        );
    }
    prompt.push_str(&finalization_rules(mode));
    prompt
}

fn vocabulary(mode: LookupMode) -> String {
    let mut text = String::from(
        "Informations sur les factures:\n\
         - Statuts de paiement : [\"Payé\", \"Non Payé\", \"En Retard\", \"Partiellement Payé\"]\n\
         - Modes de paiement : [\"Carte de Crédit\", \"Virement Bancaire\", \"Chèque\", \"Espèces\", \"PayPal\"]\n\
         - Les champs \"Date de Paiement\" et \"Mode de Paiement\" sont renseignés uniquement si le statut est \"Payé\".\n\n",
    );
    if mode == LookupMode::InvoicesAndOrders {
        text.push_str(
            "Informations sur les commandes:\n\
             - Statuts de commande : [\"Livré\", \"En cours\", \"En attente\", \"Annulé\"]\n\
             - Modes d'expédition : [\"Standard\", \"Express\", \"Premium\", \"Économique\"]\n\
             - Les champs \"Date de Livraison\" sont renseignés uniquement si le statut n'est pas \"Annulé\".\n\n",
        );
    }
    text
}

fn finalization_rules(mode: LookupMode) -> String {
    let process = match mode {
        LookupMode::InvoicesOnly => "le paiement",
        LookupMode::InvoicesAndOrders => "le paiement ou la livraison",
    };
    format!(
        "Si ces champs sont absents, cela signifie que {process} n'est pas finalisé.\n\
         Ne dites jamais que les données sont insuffisantes. Indiquez simplement que {process} n'est pas encore finalisé.\n\
         Si une date est demandée, donnez la dans un format clair, comme le jour/mois/année."
    )
}
