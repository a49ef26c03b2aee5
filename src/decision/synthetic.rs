//! Synthetic response substitution (§4.7 addition).
//!
//! When a tool executes successfully but the model's text reply to the
//! caller is empty (the model spent its whole turn on the tool call), we
//! substitute one of these canned phrasings rather than round-tripping to
//! the LLM a second time purely to narrate a result the caller is waiting
//! to hear. Selection is deterministic (first entry for the matched
//! status) rather than random, so the same tool outcome always speaks the
//! same way and the behavior is test-repeatable.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::types::ToolResult;

static TEMPLATES: Lazy<HashMap<&'static str, HashMap<&'static str, Vec<&'static str>>>> = Lazy::new(|| {
    let mut templates = HashMap::new();

    let mut process_appointment = HashMap::new();
    process_appointment.insert(
        "SLOT_LIST",
        vec!["Para el {pretty_date}, tengo disponible: {available_pretty}. ¿Alguna de estas horas le funciona?"],
    );
    process_appointment.insert(
        "SLOT_FOUND_LATER",
        vec!["Busqué para el {requested_date_iso} y no había espacio. El siguiente disponible es el {suggested_date_iso}. ¿Le parece bien?"],
    );
    process_appointment.insert("NO_SLOT", vec!["Lo siento, no encontré horarios disponibles en los próximos meses."]);
    process_appointment.insert("NO_MORE_LATE", vec!["No hay horarios más tarde ese día. ¿Quiere que busque en otro día?"]);
    process_appointment.insert("NO_MORE_EARLY", vec!["No hay horarios más temprano ese día. ¿Quiere que busque en otro día?"]);
    process_appointment.insert("NEED_EXACT_DATE", vec!["¿Podría indicarme la fecha con mayor precisión?"]);
    process_appointment.insert("OUT_OF_RANGE", vec!["Atendemos de nueve treinta a dos de la tarde. ¿Busco dentro de ese rango?"]);
    templates.insert("process_appointment_request", process_appointment);

    let mut create_event = HashMap::new();
    create_event.insert("success", vec!["Perfecto, su cita quedó agendada. ¿Le puedo ayudar con algo más?"]);
    create_event.insert("error", vec!["Hubo un problema al crear la cita. Permítame intentar nuevamente."]);
    create_event.insert("validation_error", vec!["Disculpe, hubo un error con la fecha. Permítame corregirlo."]);
    templates.insert("create_calendar_event", create_event);

    let mut search_by_phone = HashMap::new();
    search_by_phone.insert("found", vec!["Encontré su cita para el {pretty_date}. ¿Desea modificarla o cancelarla?"]);
    search_by_phone.insert("not_found", vec!["No encontré citas con ese número. ¿Desea agendar una nueva?"]);
    search_by_phone.insert("multiple", vec!["Encontré varias citas con ese número. ¿Cuál necesita consultar?"]);
    templates.insert("search_calendar_event_by_phone", search_by_phone);

    let mut edit_event = HashMap::new();
    edit_event.insert("success", vec!["Su cita ha sido modificada correctamente."]);
    edit_event.insert("error", vec!["No pude modificar la cita. ¿Intentamos de nuevo?"]);
    templates.insert("edit_calendar_event", edit_event);

    let mut delete_event = HashMap::new();
    delete_event.insert("success", vec!["Su cita ha sido cancelada."]);
    delete_event.insert("error", vec!["No pude cancelar la cita. ¿Intentamos de nuevo?"]);
    templates.insert("delete_calendar_event", delete_event);

    let mut registrar_lead = HashMap::new();
    registrar_lead.insert("success", vec!["Listo, ya quedaron registrados sus datos. ¿Le puedo ayudar con algo más?"]);
    registrar_lead.insert("error", vec!["No pude guardar sus datos. ¿Lo intentamos de nuevo?"]);
    templates.insert("registrar_lead", registrar_lead);

    templates
});

const GENERIC_SUCCESS: &str = "Listo, está hecho. ¿Hay algo más en lo que pueda ayudarle?";
const GENERIC_ERROR: &str = "Hubo un problema al procesar su solicitud. ¿Podemos intentar de nuevo?";

/// Build the caller-facing sentence for a tool's result. `status` is read
/// from `result["status"]`, falling back to `"default"`, and then to a
/// generic success/error phrasing if the tool has no matching template.
pub fn generate_synthetic_response(tool_name: &str, result: &ToolResult) -> String {
    let status = result.get("status").and_then(Value::as_str).unwrap_or("default");

    let template = TEMPLATES
        .get(tool_name)
        .and_then(|by_status| by_status.get(status).or_else(|| by_status.get("default")))
        .and_then(|candidates| candidates.first());

    match template {
        Some(template) => fill_placeholders(template, result),
        None if result.contains_key("error") => GENERIC_ERROR.to_string(),
        None => GENERIC_SUCCESS.to_string(),
    }
}

/// Substitute `{key}` placeholders from `result`. Arrays are joined with
/// " o " (max 3 entries), matching the caller-facing "option A o B" idiom.
fn fill_placeholders(template: &str, result: &ToolResult) -> String {
    let mut output = template.to_string();
    for (key, value) in result {
        let placeholder = format!("{{{key}}}");
        if !output.contains(&placeholder) {
            continue;
        }
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .take(3)
                .map(value_to_plain_string)
                .collect::<Vec<_>>()
                .join(" o "),
            other => value_to_plain_string(other),
        };
        output = output.replace(&placeholder, &rendered);
    }
    output
}

fn value_to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result_from(json: serde_json::Value) -> ToolResult {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn known_tool_and_status_selects_first_template_deterministically() {
        let result = result_from(json!({"status": "success"}));
        let response = generate_synthetic_response("create_calendar_event", &result);
        assert_eq!(response, "Perfecto, su cita quedó agendada. ¿Le puedo ayudar con algo más?");
    }

    #[test]
    fn fills_pretty_date_placeholder() {
        let result = result_from(json!({"status": "found", "pretty_date": "martes 5 de agosto"}));
        let response = generate_synthetic_response("search_calendar_event_by_phone", &result);
        assert!(response.contains("martes 5 de agosto"));
    }

    #[test]
    fn joins_available_slots_with_o() {
        let result = result_from(json!({
            "status": "SLOT_LIST",
            "pretty_date": "jueves",
            "available_pretty": ["10:00", "11:00", "14:00", "15:00"]
        }));
        let response = generate_synthetic_response("process_appointment_request", &result);
        assert!(response.contains("10:00 o 11:00 o 14:00"));
        assert!(!response.contains("15:00"));
    }

    #[test]
    fn unknown_tool_with_error_falls_back_to_generic_error() {
        let result = result_from(json!({"error": "boom"}));
        let response = generate_synthetic_response("get_cancun_weather", &result);
        assert_eq!(response, GENERIC_ERROR);
    }

    #[test]
    fn unknown_tool_without_error_falls_back_to_generic_success() {
        let result = result_from(json!({"status": "ok"}));
        let response = generate_synthetic_response("read_sheet_data", &result);
        assert_eq!(response, GENERIC_SUCCESS);
    }
}
