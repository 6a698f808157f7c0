//! Respuestas predefinidas por tema, usadas cuando ningún modelo generativo responde.
//!
//! La clasificación es por pertenencia de subcadenas en la consulta en minúsculas;
//! gana el primer tema cuya lista de palabras clave coincida.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

/// Temas reconocidos por el clasificador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Microservices,
    Architecture,
    Api,
    Cloud,
}

impl Topic {
    /// Orden de evaluación del clasificador.
    pub const ALL: [Topic; 4] = [Topic::Microservices, Topic::Architecture, Topic::Api, Topic::Cloud];

    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Topic::Microservices => &["microservice", "microservices", "service"],
            Topic::Architecture => &["architecture", "architect", "design", "pattern"],
            Topic::Api => &["api", "rest", "endpoint"],
            Topic::Cloud => &["cloud", "aws", "azure", "gcp"],
        }
    }

    pub fn templates(self) -> &'static [&'static str] {
        match self {
            Topic::Microservices => MICROSERVICES,
            Topic::Architecture => ARCHITECTURE,
            Topic::Api => API,
            Topic::Cloud => CLOUD,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Microservices => "microservices",
            Topic::Architecture => "architecture",
            Topic::Api => "api",
            Topic::Cloud => "cloud",
        }
    }
}

/// Devuelve el primer tema cuyas palabras clave aparecen en la consulta.
pub fn classify(query: &str) -> Option<Topic> {
    let lowered = query.to_lowercase();
    Topic::ALL
        .into_iter()
        .find(|topic| topic.keywords().iter().any(|kw| lowered.contains(kw)))
}

/// Elige una plantilla para la consulta. Sin tema, construye la respuesta genérica.
pub fn fallback_response<R: Rng + ?Sized>(query: &str, rng: &mut R) -> (Option<Topic>, String) {
    match classify(query) {
        Some(topic) => {
            let text = topic
                .templates()
                .choose(rng)
                .copied()
                .unwrap_or(GENERIC_CLOSING);
            (Some(topic), text.to_string())
        }
        None => (None, generic_response(query)),
    }
}

/// Consideraciones que siempre incluye la respuesta genérica.
pub const GENERIC_CONSIDERATIONS: [&str; 5] = [
    "• **Scalability**: Consider how your system will handle growth",
    "• **Reliability**: Design for fault tolerance and high availability",
    "• **Security**: Implement security measures from the start",
    "• **Performance**: Optimize for response time and throughput",
    "• **Maintainability**: Write clean, well-documented code",
];

const GENERIC_CLOSING: &str =
    "Would you like me to elaborate on any specific aspect of your question?";

pub fn generic_response(query: &str) -> String {
    let mut response = format!("**Intelligent Analysis of: '{}'**\n\n", query.trim());
    response.push_str("Based on your question, here are some key architectural considerations:\n\n");
    for line in GENERIC_CONSIDERATIONS {
        response.push_str(line);
        response.push('\n');
    }
    response.push('\n');
    response.push_str(GENERIC_CLOSING);
    response
}

const MICROSERVICES: &[&str] = &[
    "**Microservices Architecture:**\n\n\
Microservices are an architectural style where applications are built as a collection of small, independent services. \
Each service runs in its own process and communicates through well-defined APIs. Key benefits include:\n\n\
• **Scalability**: Scale individual services independently\n\
• **Technology Diversity**: Use different technologies for different services\n\
• **Fault Isolation**: Failure in one service doesn't bring down the entire system\n\
• **Team Autonomy**: Teams can work independently on different services\n\
• **Deployment Flexibility**: Deploy services independently",
    "**Microservices Best Practices:**\n\n\
1. **Service Independence**: Each service should be independently deployable\n\
2. **Database per Service**: Each service should have its own database\n\
3. **API Gateway**: Use an API gateway for client communication\n\
4. **Service Discovery**: Implement service discovery for dynamic scaling\n\
5. **Circuit Breaker**: Implement circuit breakers for fault tolerance\n\
6. **Monitoring**: Comprehensive logging and monitoring\n\
7. **CI/CD**: Automated deployment pipelines\n\
8. **Containerization**: Use Docker for consistent environments",
];

const ARCHITECTURE: &[&str] = &[
    "**Software Architecture Principles:**\n\n\
1. **Separation of Concerns**: Divide system into distinct responsibilities\n\
2. **Single Responsibility**: Each component has one reason to change\n\
3. **Open/Closed Principle**: Open for extension, closed for modification\n\
4. **Dependency Inversion**: Depend on abstractions, not concretions\n\
5. **Scalability**: Design for horizontal and vertical scaling\n\
6. **Security**: Implement security at every layer\n\
7. **Performance**: Optimize for response time and throughput\n\
8. **Maintainability**: Code should be easy to understand and modify",
    "**Modern Architecture Patterns:**\n\n\
• **Event-Driven Architecture**: Services communicate through events\n\
• **CQRS**: Separate read and write operations\n\
• **Event Sourcing**: Store all changes as events\n\
• **Domain-Driven Design**: Align code with business domains\n\
• **Hexagonal Architecture**: Isolate business logic from external concerns",
];

const API: &[&str] = &[
    "**API Design Best Practices:**\n\n\
1. **RESTful Design**: Use proper HTTP methods and status codes\n\
2. **Versioning**: Implement API versioning strategy\n\
3. **Documentation**: Comprehensive API documentation\n\
4. **Authentication**: Secure authentication and authorization\n\
5. **Rate Limiting**: Implement rate limiting for API protection\n\
6. **Error Handling**: Consistent error responses\n\
7. **Caching**: Implement appropriate caching strategies\n\
8. **Testing**: Comprehensive API testing",
    "**API Security & Performance:**\n\n\
• **OAuth 2.0**: Use industry-standard authentication\n\
• **JWT Tokens**: Stateless authentication tokens\n\
• **API Gateway**: Centralized API management\n\
• **Load Balancing**: Distribute traffic across multiple instances\n\
• **Caching**: Redis or CDN for improved performance",
];

const CLOUD: &[&str] = &[
    "**Cloud Architecture Patterns:**\n\n\
• **Multi-Cloud**: Use multiple cloud providers for redundancy\n\
• **Serverless**: Use functions-as-a-service for event-driven workloads\n\
• **Container Orchestration**: Kubernetes for managing containerized applications\n\
• **Infrastructure as Code**: Terraform or CloudFormation for automated provisioning\n\
• **DevOps**: Continuous integration and deployment pipelines",
    "**Cloud Best Practices:**\n\n\
1. **Auto-scaling**: Automatically scale based on demand\n\
2. **Load Balancing**: Distribute traffic across multiple instances\n\
3. **Monitoring**: Comprehensive cloud monitoring and alerting\n\
4. **Backup & Recovery**: Regular backups and disaster recovery plans\n\
5. **Security**: Implement security at every layer",
];
