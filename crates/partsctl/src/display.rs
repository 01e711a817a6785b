//! Terminal rendering of daemon responses

use owo_colors::OwoColorize;
use parts_common::{
    AssistantResponse, CacheStats, Fit, HealthResponse, PartView, ResponseType, SessionSnapshot,
};

fn route_label(kind: ResponseType) -> String {
    match kind {
        ResponseType::PartLookup | ResponseType::Compatibility | ResponseType::SymptomTroubleshoot => {
            kind.as_str().green().to_string()
        }
        ResponseType::CompatibilityUnvalidated | ResponseType::SymptomTroubleshootUnvalidated => {
            kind.as_str().yellow().to_string()
        }
        _ => kind.as_str().cyan().to_string(),
    }
}

fn part_line(part: &PartView) -> String {
    let mut line = format!("{}  {}", part.part_id.bold(), part.title);
    if let Some(price) = &part.price {
        line.push_str(&format!("  {}", price.dimmed()));
    }
    if let Some(rating) = part.rating {
        line.push_str(&format!("  ★{:.1}", rating));
    }
    line
}

fn part_section(title: &str, parts: &[PartView]) {
    if parts.is_empty() {
        return;
    }
    println!();
    println!("{}", title.bold());
    for part in parts {
        println!("  {}", part_line(part));
    }
}

pub fn print_response(conversation_id: &str, r: &AssistantResponse) {
    println!(
        "{} {}  confidence {:.2}  {}",
        "▸".cyan(),
        route_label(r.kind),
        r.confidence,
        conversation_id.dimmed()
    );

    if let Some(message) = &r.message {
        println!();
        println!("{}", message);
    }
    if let Some(explanation) = &r.explanation {
        println!();
        println!("{}", explanation);
    }

    if let Some(part) = &r.part {
        println!();
        println!("{}", part_line(part));
    }
    if let Some(compatible) = r.compatible {
        let verdict = if compatible {
            "compatible".green().to_string()
        } else {
            "not compatible".red().to_string()
        };
        println!("Fit with {}: {}", r.model_id.as_deref().unwrap_or("?"), verdict);
    }
    if r.fit == Some(Fit::Unverified) {
        println!("{}", "Fit not verified against your model".yellow());
    }

    if !r.diagnostic_steps.is_empty() {
        println!();
        println!("{}", "Steps".bold());
        for (i, step) in r.diagnostic_steps.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
    }

    part_section("Recommended parts", &r.recommended_parts);
    part_section("Alternatives", &r.alternative_parts);
    part_section("Related parts", &r.related_parts);

    if !r.helpful_tips.is_empty() {
        println!();
        for tip in &r.helpful_tips {
            println!("  {} {}", "•".dimmed(), tip);
        }
    }
    for question in &r.clarification_questions {
        println!("  {} {}", "?".yellow(), question);
    }
}

pub fn print_health(h: &HealthResponse) {
    let status = if h.status == "ok" {
        h.status.green().to_string()
    } else {
        h.status.red().to_string()
    };
    println!("{} {}", "partsd".bold(), h.version);
    println!("  status           {}", status);
    println!("  parts loaded     {}", h.parts_loaded);
    println!("  models loaded    {}", h.models_loaded);
    println!("  active sessions  {}", h.active_sessions);
    println!("  uptime           {}s", h.uptime_secs);
}

pub fn print_cache_stats(s: &CacheStats) {
    println!("{}", "Planner cache".bold());
    println!("  entries   {}/{}", s.size, s.capacity);
    println!("  hits      {}", s.hits);
    println!("  misses    {}", s.misses);
    println!("  hit rate  {:.1}%", s.hit_rate_pct);
}

pub fn print_session(s: &SessionSnapshot) {
    let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    println!("{} {}", "Session".bold(), s.conversation_id);
    println!(
        "  model      {}{}",
        show(&s.last_model),
        if s.last_model.is_some() && !s.last_model_valid {
            " (not in catalog)".yellow().to_string()
        } else {
            String::new()
        }
    );
    println!("  symptom    {}", show(&s.last_symptom));
    println!("  part       {}", show(&s.last_part));
    println!("  appliance  {}", show(&s.appliance));
    println!("  brand      {}", show(&s.brand));
    println!("  pending    {:?}", s.pending);
    println!("  turns      {}", s.turn_count);
    println!("  updated    {}", s.updated_at.to_rfc3339());

    if !s.recent_turns.is_empty() {
        println!();
        for turn in &s.recent_turns {
            let label = match turn.response_type {
                Some(kind) => format!("{} [{}]", turn.role, kind),
                None => turn.role.clone(),
            };
            let first_line = turn.content.lines().next().unwrap_or_default();
            println!("  {} {}", label.dimmed(), first_line);
        }
    }
}
