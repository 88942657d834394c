use serde_json::{json, Map, Value};

use crate::domain::calendar::AvailabilityCheck;
use crate::domain::conversation::{ConversationState, Stage};
use crate::flows::router::StepName;

pub const QUALIFICATION_FIELDS: &[&str] = &["student_name", "student_age", "subject"];
pub const SCHEDULING_FIELDS: &[&str] = &["preferred_time"];

/// Everything a step may look at. Steps never perform I/O; availability is
/// resolved by the caller beforehand.
#[derive(Clone, Copy, Debug)]
pub struct StepInput<'a> {
    pub state: &'a ConversationState,
    pub text: &'a str,
    pub entities: &'a Map<String, Value>,
    pub availability: Option<&'a AvailabilityCheck>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepOutcome {
    pub step: StepName,
    pub response_text: String,
    pub next_stage: Stage,
    pub missing_fields: Vec<String>,
    pub context_patch: Map<String, Value>,
}

pub trait FlowDefinition: Send + Sync {
    fn required_fields(&self, stage: Stage) -> &'static [&'static str];
    fn execute(&self, step: StepName, input: &StepInput<'_>) -> StepOutcome;
}

#[derive(Clone, Debug, Default)]
pub struct TutoringFlow;

impl FlowDefinition for TutoringFlow {
    fn required_fields(&self, stage: Stage) -> &'static [&'static str] {
        match stage {
            Stage::Qualification => QUALIFICATION_FIELDS,
            Stage::Scheduling => SCHEDULING_FIELDS,
            _ => &[],
        }
    }

    fn execute(&self, step: StepName, input: &StepInput<'_>) -> StepOutcome {
        match step {
            StepName::Greeting => greeting_step(input),
            StepName::Qualification => qualification_step(self, input),
            StepName::Information => information_step(self, input),
            StepName::Scheduling => scheduling_step(self, input),
            StepName::Objection => objection_step(input),
            StepName::Fallback => fallback_step(input),
        }
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn execute(&self, step: StepName, input: &StepInput<'_>) -> StepOutcome {
        let mut outcome = self.flow.execute(step, input);
        if outcome.response_text.trim().is_empty() {
            outcome.response_text = FALLBACK_REPLY.to_string();
        }
        outcome
    }
}

impl Default for FlowEngine<TutoringFlow> {
    fn default() -> Self {
        Self::new(TutoringFlow)
    }
}

const FALLBACK_REPLY: &str =
    "Desculpe, não entendi muito bem. Pode me contar de outro jeito como posso ajudar?";

fn missing_for(fields: &[&str], input: &StepInput<'_>) -> Vec<String> {
    fields
        .iter()
        .filter(|field| input.state.entity(input.entities, field).is_none())
        .map(|field| (*field).to_string())
        .collect()
}

fn field_label(field: &str) -> &str {
    match field {
        "student_name" => "o nome do aluno",
        "student_age" => "a idade do aluno",
        "subject" => "a matéria em que precisa de ajuda",
        "preferred_time" => "o melhor dia e horário para a aula experimental",
        other => other,
    }
}

fn ask_for(missing: &[String]) -> String {
    let labels = missing.iter().map(|field| field_label(field)).collect::<Vec<_>>();
    match labels.as_slice() {
        [] => String::new(),
        [only] => format!("Pode me informar {only}?"),
        [init @ .., last] => format!("Pode me informar {} e {last}?", init.join(", ")),
    }
}

fn outcome(
    step: StepName,
    response_text: impl Into<String>,
    next_stage: Stage,
    missing_fields: Vec<String>,
) -> StepOutcome {
    let mut context_patch = Map::new();
    context_patch.insert("last_step".to_string(), json!(step.as_str()));
    StepOutcome {
        step,
        response_text: response_text.into(),
        next_stage,
        missing_fields,
        context_patch,
    }
}

fn greeting_step(input: &StepInput<'_>) -> StepOutcome {
    let current = input.state.stage;
    if current == Stage::Greeting {
        return outcome(
            StepName::Greeting,
            "Olá! Que bom ter você por aqui. Para começarmos, qual é o nome do aluno?",
            Stage::Qualification,
            Vec::new(),
        );
    }

    outcome(
        StepName::Greeting,
        "Olá de novo! Podemos continuar de onde paramos.",
        current,
        Vec::new(),
    )
}

fn qualification_step(flow: &TutoringFlow, input: &StepInput<'_>) -> StepOutcome {
    let current = input.state.stage;
    let missing = missing_for(flow.required_fields(Stage::Qualification), input);

    if !missing.is_empty() {
        return outcome(StepName::Qualification, ask_for(&missing), Stage::Qualification, missing);
    }

    let next = if current <= Stage::Qualification { Stage::Information } else { current };
    outcome(
        StepName::Qualification,
        "Perfeito, já tenho tudo o que preciso! Quer saber como funcionam as aulas ou prefere \
         agendar uma aula experimental?",
        next,
        Vec::new(),
    )
}

fn information_step(flow: &TutoringFlow, input: &StepInput<'_>) -> StepOutcome {
    let current = input.state.stage;
    let base = "Nossas aulas são individuais, com plano de estudos personalizado e \
                acompanhamento semanal com os responsáveis.";

    if current == Stage::Greeting {
        return outcome(
            StepName::Information,
            format!("{base} Para indicar o melhor professor, qual é o nome do aluno?"),
            Stage::Qualification,
            Vec::new(),
        );
    }

    let missing = missing_for(flow.required_fields(Stage::Qualification), input);
    let response = if current == Stage::Qualification && !missing.is_empty() {
        format!("{base} {}", ask_for(&missing))
    } else {
        format!("{base} Posso agendar uma aula experimental gratuita?")
    };
    outcome(StepName::Information, response, current, missing)
}

fn scheduling_step(flow: &TutoringFlow, input: &StepInput<'_>) -> StepOutcome {
    let current = input.state.stage;

    if current == Stage::Completed {
        return outcome(
            StepName::Scheduling,
            "Sua aula experimental já está agendada. Se precisar remarcar, é só avisar!",
            current,
            Vec::new(),
        );
    }

    if current == Stage::Confirmation {
        match input.entities.get("confirmed").and_then(Value::as_bool) {
            Some(true) => {
                let mut confirmed = outcome(
                    StepName::Scheduling,
                    "Aula experimental confirmada! Enviaremos um lembrete um dia antes.",
                    Stage::Completed,
                    Vec::new(),
                );
                confirmed.context_patch.insert("slot_confirmed".to_string(), json!(true));
                return confirmed;
            }
            Some(false) => {
                return outcome(
                    StepName::Scheduling,
                    "Sem problemas! Qual outro dia e horário seria melhor?",
                    Stage::Scheduling,
                    SCHEDULING_FIELDS.iter().map(|field| (*field).to_string()).collect(),
                );
            }
            None => {}
        }
    }

    let missing = missing_for(flow.required_fields(Stage::Qualification), input);
    if !missing.is_empty() {
        return outcome(
            StepName::Scheduling,
            format!("Antes de agendar, preciso de alguns dados. {}", ask_for(&missing)),
            Stage::Qualification,
            missing,
        );
    }

    let Some(availability) = input.availability else {
        let missing = missing_for(flow.required_fields(Stage::Scheduling), input);
        let missing = if missing.is_empty() {
            SCHEDULING_FIELDS.iter().map(|field| (*field).to_string()).collect()
        } else {
            missing
        };
        return outcome(StepName::Scheduling, ask_for(&missing), Stage::Scheduling, missing);
    };

    if !availability.is_free() {
        let mut busy = outcome(
            StepName::Scheduling,
            "Esse horário já está ocupado. Pode sugerir outro dia ou horário?",
            Stage::Scheduling,
            Vec::new(),
        );
        busy.context_patch
            .insert("rejected_slot".to_string(), json!(availability.window.cache_key()));
        return busy;
    }

    let slot = availability.window.start.format("%d/%m às %H:%M UTC").to_string();
    let mut proposed = outcome(
        StepName::Scheduling,
        format!("Temos disponibilidade em {slot}. Posso confirmar a aula experimental?"),
        Stage::Confirmation,
        Vec::new(),
    );
    proposed
        .context_patch
        .insert("pending_slot".to_string(), json!(availability.window.cache_key()));
    proposed
}

fn objection_step(input: &StepInput<'_>) -> StepOutcome {
    let current = input.state.stage;
    let objection = input
        .entities
        .get("objection_type")
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or("unspecified")
        .to_string();

    let response = match objection.as_str() {
        "price" => "Entendo a preocupação com o valor. A primeira aula é gratuita, assim você \
                    avalia sem compromisso. Posso reservar um horário?",
        "time" => "Temos horários flexíveis, inclusive aos sábados. Qual período funciona melhor?",
        _ => "Entendo. Fico à disposição para tirar qualquer dúvida antes de decidir.",
    };

    let next = if current == Stage::Completed { current } else { Stage::FollowUp };
    let mut handled = outcome(StepName::Objection, response, next, Vec::new());
    handled.context_patch.insert("last_objection".to_string(), json!(objection));
    handled
}

fn fallback_step(input: &StepInput<'_>) -> StepOutcome {
    outcome(StepName::Fallback, FALLBACK_REPLY, input.state.stage, Vec::new())
}
