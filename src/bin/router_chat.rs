use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::io::Write;

use agent_router_rs::error::BoxError;
use agent_router_rs::{
    Agent, AnthropicModel, ModelClassifier, Orchestrator, OrchestratorConfig, ResponseOutput,
    StreamIncrement, ToolSpec, TracingCallbacks,
};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let model_name =
        env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| "claude-sonnet-4-5".to_string());
    let config = match env::var("ROUTER_CONFIG") {
        Ok(path) => OrchestratorConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        Err(_) => OrchestratorConfig::default(),
    };

    let classifier = ModelClassifier::new(AnthropicModel::from_env(model_name.clone())?)?;
    let orchestrator = Orchestrator::new(classifier, config);

    orchestrator.add_agent(
        Agent::builder()
            .name("Tech")
            .description(
                "Specializes in technology areas including software development, hardware, AI, \
                 cybersecurity, blockchain, cloud computing and tech product pricing",
            )
            .streaming(true)
            .model(AnthropicModel::from_env(model_name.clone())?)
            .system_prompt("You are a concise technology expert.")
            .build()?,
    )?;
    orchestrator.add_agent(
        Agent::builder()
            .name("Health")
            .description(
                "Focuses on health and medical topics such as general wellness, nutrition, \
                 fitness, mental health, symptoms and treatments",
            )
            .streaming(true)
            .model(AnthropicModel::from_env(model_name.clone())?)
            .system_prompt("You give careful general health information, never diagnoses.")
            .build()?,
    )?;
    orchestrator.add_agent(
        Agent::builder()
            .name("Weather")
            .description("Gives the current weather condition for a city")
            .streaming(false)
            .model(AnthropicModel::from_env(model_name)?)
            .system_prompt("Answer weather questions using the get_weather tool.")
            .tool(weather_tool()?)
            .callbacks(TracingCallbacks)
            .build()?,
    )?;

    let session_id = uuid::Uuid::new_v4().to_string();
    println!(
        "agents: {} (session {session_id}, type 'quit' to exit)",
        orchestrator.agent_names().join(", ")
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let utterance = line.trim();
        if utterance.is_empty() {
            continue;
        }
        if utterance.eq_ignore_ascii_case("quit") {
            break;
        }

        let envelope = match orchestrator
            .route_request(utterance, "cli-user", &session_id, HashMap::new(), true)
            .await
        {
            Ok(envelope) => envelope,
            Err(err) => {
                eprintln!("error: {err}");
                continue;
            }
        };

        println!("[{}]", envelope.selected_agent_name());
        match envelope.output {
            ResponseOutput::Message(message) => println!("{}", message.text()),
            ResponseOutput::Stream(mut stream) => {
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(StreamIncrement::TextDelta(text)) => {
                            print!("{text}");
                            std::io::stdout().flush()?;
                        }
                        Ok(StreamIncrement::ToolCallDelta { name, .. }) => {
                            println!("\n(calling {name})");
                        }
                        Ok(StreamIncrement::EndOfTurn { .. }) => println!(),
                        Ok(StreamIncrement::ThinkingDelta(_)) => {}
                        Err(err) => {
                            eprintln!("\nerror: {err}");
                            break;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn weather_tool() -> Result<ToolSpec, Box<dyn Error>> {
    let client = reqwest::Client::new();
    let tool = ToolSpec::new("get_weather", "Current weather for a city")
        .with_schema(json!({
            "type": "object",
            "properties": {
                "city": {"type": "string", "description": "City name, e.g. Paris"}
            },
            "required": ["city"]
        }))?
        .with_handler(move |args, _ctx| {
            let client = client.clone();
            async move {
                let city = args["city"].as_str().unwrap_or_default().to_string();
                current_weather(&client, &city).await
            }
        });
    Ok(tool)
}

async fn current_weather(client: &reqwest::Client, city: &str) -> Result<Value, BoxError> {
    let places: Value = client
        .get(GEOCODING_URL)
        .query(&[("name", city), ("count", "1")])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let place = places["results"]
        .get(0)
        .ok_or_else(|| format!("no location found for {city}"))?;
    let latitude = place["latitude"].as_f64().unwrap_or_default();
    let longitude = place["longitude"].as_f64().unwrap_or_default();

    let forecast: Value = client
        .get(FORECAST_URL)
        .query(&[
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            ("current", "temperature_2m,wind_speed_10m,weather_code".to_string()),
        ])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(json!({
        "city": place["name"],
        "country": place["country"],
        "current": forecast["current"],
        "units": forecast["current_units"],
    }))
}
