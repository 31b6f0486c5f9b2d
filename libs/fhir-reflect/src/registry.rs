//! The built-in R4 descriptor tables and the lookup index over them.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::descriptor::Cardinality::{Multiple, Singular};
use crate::descriptor::{choice, field, FieldDescriptor, TypeDescriptor};

/// Every R4 resource-type name. Used for resource-type gates in path
/// expressions and for RESTful reference-URL validation.
pub const RESOURCE_TYPES: &[&str] = &[
    "Account", "ActivityDefinition", "AdverseEvent", "AllergyIntolerance", "Appointment",
    "AppointmentResponse", "AuditEvent", "Basic", "Binary", "BiologicallyDerivedProduct",
    "BodyStructure", "Bundle", "CapabilityStatement", "CarePlan", "CareTeam", "CatalogEntry",
    "ChargeItem", "ChargeItemDefinition", "Claim", "ClaimResponse", "ClinicalImpression",
    "CodeSystem", "Communication", "CommunicationRequest", "CompartmentDefinition",
    "Composition", "ConceptMap", "Condition", "Consent", "Contract", "Coverage",
    "CoverageEligibilityRequest", "CoverageEligibilityResponse", "DetectedIssue", "Device",
    "DeviceDefinition", "DeviceMetric", "DeviceRequest", "DeviceUseStatement",
    "DiagnosticReport", "DocumentManifest", "DocumentReference", "EffectEvidenceSynthesis",
    "Encounter", "Endpoint", "EnrollmentRequest", "EnrollmentResponse", "EpisodeOfCare",
    "EventDefinition", "Evidence", "EvidenceVariable", "ExampleScenario",
    "ExplanationOfBenefit", "FamilyMemberHistory", "Flag", "Goal", "GraphDefinition", "Group",
    "GuidanceResponse", "HealthcareService", "ImagingStudy", "Immunization",
    "ImmunizationEvaluation", "ImmunizationRecommendation", "ImplementationGuide",
    "InsurancePlan", "Invoice", "Library", "Linkage", "List", "Location", "Measure",
    "MeasureReport", "Media", "Medication", "MedicationAdministration", "MedicationDispense",
    "MedicationKnowledge", "MedicationRequest", "MedicationStatement",
    "MedicinalProduct", "MedicinalProductAuthorization", "MedicinalProductContraindication",
    "MedicinalProductIndication", "MedicinalProductIngredient", "MedicinalProductInteraction",
    "MedicinalProductManufactured", "MedicinalProductPackaged", "MedicinalProductPharmaceutical",
    "MedicinalProductUndesirableEffect", "MessageDefinition", "MessageHeader",
    "MolecularSequence", "NamingSystem", "NutritionOrder", "Observation",
    "ObservationDefinition", "OperationDefinition", "OperationOutcome", "Organization",
    "OrganizationAffiliation", "Parameters", "Patient", "PaymentNotice",
    "PaymentReconciliation", "Person", "PlanDefinition", "Practitioner", "PractitionerRole",
    "Procedure", "Provenance", "Questionnaire", "QuestionnaireResponse", "RelatedPerson",
    "RequestGroup", "ResearchDefinition", "ResearchElementDefinition", "ResearchStudy",
    "ResearchSubject", "RiskAssessment", "RiskEvidenceSynthesis", "Schedule",
    "SearchParameter", "ServiceRequest", "Slot", "Specimen", "SpecimenDefinition",
    "StructureDefinition", "StructureMap", "Subscription", "Substance",
    "SubstanceNucleicAcid", "SubstancePolymer", "SubstanceProtein",
    "SubstanceReferenceInformation", "SubstanceSourceMaterial", "SubstanceSpecification",
    "SupplyDelivery", "SupplyRequest", "Task", "TerminologyCapabilities", "TestReport",
    "TestScript", "ValueSet", "VerificationResult", "VisionPrescription",
];

/// The alternatives of `Extension.value[x]` (R4). Shared with a few other
/// open choice fields.
const EXTENSION_VALUE_TYPES: &[&str] = &[
    "base64Binary", "boolean", "canonical", "code", "date", "dateTime", "decimal", "id",
    "instant", "integer", "markdown", "oid", "positiveInt", "string", "time", "unsignedInt",
    "uri", "url", "uuid", "Address", "Age", "Annotation", "Attachment", "CodeableConcept",
    "Coding", "ContactPoint", "Count", "Distance", "Duration", "HumanName", "Identifier",
    "Money", "Period", "Quantity", "Range", "Ratio", "Reference", "SampledData", "Signature",
    "Timing",
];

const OBSERVATION_VALUE_TYPES: &[&str] = &[
    "Quantity", "CodeableConcept", "string", "boolean", "integer", "Range", "Ratio",
    "SampledData", "time", "dateTime", "Period",
];

static DESCRIPTORS: &[TypeDescriptor] = &[
    // ------------------------------------------------------------------
    // Abstract bases
    // ------------------------------------------------------------------
    TypeDescriptor {
        name: "Element",
        base: None,
        fields: &[
            field("id", "string", Singular),
            field("extension", "Extension", Multiple),
        ],
    },
    TypeDescriptor {
        name: "BackboneElement",
        base: Some("Element"),
        fields: &[field("modifierExtension", "Extension", Multiple)],
    },
    TypeDescriptor {
        name: "Resource",
        base: None,
        fields: &[
            field("id", "id", Singular),
            field("meta", "Meta", Singular),
            field("implicitRules", "uri", Singular),
            field("language", "code", Singular),
        ],
    },
    TypeDescriptor {
        name: "DomainResource",
        base: Some("Resource"),
        fields: &[
            field("text", "Narrative", Singular),
            field("contained", "Resource", Multiple),
            field("extension", "Extension", Multiple),
            field("modifierExtension", "Extension", Multiple),
        ],
    },
    // ------------------------------------------------------------------
    // General-purpose datatypes
    // ------------------------------------------------------------------
    TypeDescriptor {
        name: "Meta",
        base: Some("Element"),
        fields: &[
            field("versionId", "id", Singular),
            field("lastUpdated", "instant", Singular),
            field("source", "uri", Singular),
            field("profile", "canonical", Multiple),
            field("security", "Coding", Multiple),
            field("tag", "Coding", Multiple),
        ],
    },
    TypeDescriptor {
        name: "Narrative",
        base: Some("Element"),
        fields: &[
            field("status", "code", Singular),
            field("div", "xhtml", Singular),
        ],
    },
    TypeDescriptor {
        name: "Extension",
        base: Some("Element"),
        fields: &[
            field("url", "uri", Singular),
            choice("value", EXTENSION_VALUE_TYPES, Singular),
        ],
    },
    TypeDescriptor {
        name: "Identifier",
        base: Some("Element"),
        fields: &[
            field("use", "code", Singular),
            field("type", "CodeableConcept", Singular),
            field("system", "uri", Singular),
            field("value", "string", Singular),
            field("period", "Period", Singular),
            field("assigner", "Reference", Singular),
        ],
    },
    TypeDescriptor {
        name: "HumanName",
        base: Some("Element"),
        fields: &[
            field("use", "code", Singular),
            field("text", "string", Singular),
            field("family", "string", Singular),
            field("given", "string", Multiple),
            field("prefix", "string", Multiple),
            field("suffix", "string", Multiple),
            field("period", "Period", Singular),
        ],
    },
    TypeDescriptor {
        name: "Address",
        base: Some("Element"),
        fields: &[
            field("use", "code", Singular),
            field("type", "code", Singular),
            field("text", "string", Singular),
            field("line", "string", Multiple),
            field("city", "string", Singular),
            field("district", "string", Singular),
            field("state", "string", Singular),
            field("postalCode", "string", Singular),
            field("country", "string", Singular),
            field("period", "Period", Singular),
        ],
    },
    TypeDescriptor {
        name: "ContactPoint",
        base: Some("Element"),
        fields: &[
            field("system", "code", Singular),
            field("value", "string", Singular),
            field("use", "code", Singular),
            field("rank", "positiveInt", Singular),
            field("period", "Period", Singular),
        ],
    },
    TypeDescriptor {
        name: "Coding",
        base: Some("Element"),
        fields: &[
            field("system", "uri", Singular),
            field("version", "string", Singular),
            field("code", "code", Singular),
            field("display", "string", Singular),
            field("userSelected", "boolean", Singular),
        ],
    },
    TypeDescriptor {
        name: "CodeableConcept",
        base: Some("Element"),
        fields: &[
            field("coding", "Coding", Multiple),
            field("text", "string", Singular),
        ],
    },
    TypeDescriptor {
        name: "Quantity",
        base: Some("Element"),
        fields: &[
            field("value", "decimal", Singular),
            field("comparator", "code", Singular),
            field("unit", "string", Singular),
            field("system", "uri", Singular),
            field("code", "code", Singular),
        ],
    },
    TypeDescriptor {
        name: "Range",
        base: Some("Element"),
        fields: &[
            field("low", "Quantity", Singular),
            field("high", "Quantity", Singular),
        ],
    },
    TypeDescriptor {
        name: "Ratio",
        base: Some("Element"),
        fields: &[
            field("numerator", "Quantity", Singular),
            field("denominator", "Quantity", Singular),
        ],
    },
    TypeDescriptor {
        name: "Period",
        base: Some("Element"),
        fields: &[
            field("start", "dateTime", Singular),
            field("end", "dateTime", Singular),
        ],
    },
    TypeDescriptor {
        name: "Reference",
        base: Some("Element"),
        fields: &[
            field("reference", "string", Singular),
            field("type", "uri", Singular),
            field("identifier", "Identifier", Singular),
            field("display", "string", Singular),
        ],
    },
    TypeDescriptor {
        name: "Annotation",
        base: Some("Element"),
        fields: &[
            choice("author", &["Reference", "string"], Singular),
            field("time", "dateTime", Singular),
            field("text", "markdown", Singular),
        ],
    },
    TypeDescriptor {
        name: "Attachment",
        base: Some("Element"),
        fields: &[
            field("contentType", "code", Singular),
            field("language", "code", Singular),
            field("data", "base64Binary", Singular),
            field("url", "url", Singular),
            field("size", "unsignedInt", Singular),
            field("hash", "base64Binary", Singular),
            field("title", "string", Singular),
            field("creation", "dateTime", Singular),
        ],
    },
    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------
    TypeDescriptor {
        name: "Patient",
        base: Some("DomainResource"),
        fields: &[
            field("identifier", "Identifier", Multiple),
            field("active", "boolean", Singular),
            field("name", "HumanName", Multiple),
            field("telecom", "ContactPoint", Multiple),
            field("gender", "code", Singular),
            field("birthDate", "date", Singular),
            choice("deceased", &["boolean", "dateTime"], Singular),
            field("address", "Address", Multiple),
            field("maritalStatus", "CodeableConcept", Singular),
            choice("multipleBirth", &["boolean", "integer"], Singular),
            field("photo", "Attachment", Multiple),
            field("contact", "Patient.Contact", Multiple),
            field("communication", "Patient.Communication", Multiple),
            field("generalPractitioner", "Reference", Multiple),
            field("managingOrganization", "Reference", Singular),
            field("link", "Patient.Link", Multiple),
        ],
    },
    TypeDescriptor {
        name: "Patient.Contact",
        base: Some("BackboneElement"),
        fields: &[
            field("relationship", "CodeableConcept", Multiple),
            field("name", "HumanName", Singular),
            field("telecom", "ContactPoint", Multiple),
            field("address", "Address", Singular),
            field("gender", "code", Singular),
            field("organization", "Reference", Singular),
            field("period", "Period", Singular),
        ],
    },
    TypeDescriptor {
        name: "Patient.Communication",
        base: Some("BackboneElement"),
        fields: &[
            field("language", "CodeableConcept", Singular),
            field("preferred", "boolean", Singular),
        ],
    },
    TypeDescriptor {
        name: "Patient.Link",
        base: Some("BackboneElement"),
        fields: &[
            field("other", "Reference", Singular),
            field("type", "code", Singular),
        ],
    },
    TypeDescriptor {
        name: "Observation",
        base: Some("DomainResource"),
        fields: &[
            field("identifier", "Identifier", Multiple),
            field("basedOn", "Reference", Multiple),
            field("partOf", "Reference", Multiple),
            field("status", "code", Singular),
            field("category", "CodeableConcept", Multiple),
            field("code", "CodeableConcept", Singular),
            field("subject", "Reference", Singular),
            field("focus", "Reference", Multiple),
            field("encounter", "Reference", Singular),
            choice("effective", &["dateTime", "Period", "Timing", "instant"], Singular),
            field("issued", "instant", Singular),
            field("performer", "Reference", Multiple),
            choice("value", OBSERVATION_VALUE_TYPES, Singular),
            field("dataAbsentReason", "CodeableConcept", Singular),
            field("interpretation", "CodeableConcept", Multiple),
            field("note", "Annotation", Multiple),
            field("bodySite", "CodeableConcept", Singular),
            field("method", "CodeableConcept", Singular),
            field("referenceRange", "Observation.ReferenceRange", Multiple),
            field("hasMember", "Reference", Multiple),
            field("derivedFrom", "Reference", Multiple),
            field("component", "Observation.Component", Multiple),
        ],
    },
    TypeDescriptor {
        name: "Observation.ReferenceRange",
        base: Some("BackboneElement"),
        fields: &[
            field("low", "Quantity", Singular),
            field("high", "Quantity", Singular),
            field("type", "CodeableConcept", Singular),
            field("appliesTo", "CodeableConcept", Multiple),
            field("age", "Range", Singular),
            field("text", "string", Singular),
        ],
    },
    TypeDescriptor {
        name: "Observation.Component",
        base: Some("BackboneElement"),
        fields: &[
            field("code", "CodeableConcept", Singular),
            choice("value", OBSERVATION_VALUE_TYPES, Singular),
            field("dataAbsentReason", "CodeableConcept", Singular),
            field("interpretation", "CodeableConcept", Multiple),
        ],
    },
    TypeDescriptor {
        name: "Bundle",
        base: Some("Resource"),
        fields: &[
            field("identifier", "Identifier", Singular),
            field("type", "code", Singular),
            field("timestamp", "instant", Singular),
            field("total", "unsignedInt", Singular),
            field("link", "Bundle.Link", Multiple),
            field("entry", "Bundle.Entry", Multiple),
        ],
    },
    TypeDescriptor {
        name: "Bundle.Link",
        base: Some("BackboneElement"),
        fields: &[
            field("relation", "string", Singular),
            field("url", "uri", Singular),
        ],
    },
    TypeDescriptor {
        name: "Bundle.Entry",
        base: Some("BackboneElement"),
        fields: &[
            field("link", "Bundle.Link", Multiple),
            field("fullUrl", "uri", Singular),
            field("resource", "Resource", Singular),
            field("search", "Bundle.Search", Singular),
        ],
    },
    TypeDescriptor {
        name: "Bundle.Search",
        base: Some("BackboneElement"),
        fields: &[
            field("mode", "code", Singular),
            field("score", "decimal", Singular),
        ],
    },
    TypeDescriptor {
        name: "List",
        base: Some("DomainResource"),
        fields: &[
            field("identifier", "Identifier", Multiple),
            field("status", "code", Singular),
            field("mode", "code", Singular),
            field("title", "string", Singular),
            field("code", "CodeableConcept", Singular),
            field("subject", "Reference", Singular),
            field("encounter", "Reference", Singular),
            field("date", "dateTime", Singular),
            field("source", "Reference", Singular),
            field("orderedBy", "CodeableConcept", Singular),
            field("note", "Annotation", Multiple),
            field("entry", "List.Entry", Multiple),
            field("emptyReason", "CodeableConcept", Singular),
        ],
    },
    TypeDescriptor {
        name: "List.Entry",
        base: Some("BackboneElement"),
        fields: &[
            field("flag", "CodeableConcept", Singular),
            field("deleted", "boolean", Singular),
            field("date", "dateTime", Singular),
            field("item", "Reference", Singular),
        ],
    },
    TypeDescriptor {
        name: "Location",
        base: Some("DomainResource"),
        fields: &[
            field("identifier", "Identifier", Multiple),
            field("status", "code", Singular),
            field("operationalStatus", "Coding", Singular),
            field("name", "string", Singular),
            field("alias", "string", Multiple),
            field("description", "string", Singular),
            field("mode", "code", Singular),
            field("type", "CodeableConcept", Multiple),
            field("telecom", "ContactPoint", Multiple),
            field("address", "Address", Singular),
            field("physicalType", "CodeableConcept", Singular),
            field("position", "Location.Position", Singular),
            field("managingOrganization", "Reference", Singular),
            field("partOf", "Reference", Singular),
        ],
    },
    TypeDescriptor {
        name: "Location.Position",
        base: Some("BackboneElement"),
        fields: &[
            field("longitude", "decimal", Singular),
            field("latitude", "decimal", Singular),
            field("altitude", "decimal", Singular),
        ],
    },
    TypeDescriptor {
        name: "Practitioner",
        base: Some("DomainResource"),
        fields: &[
            field("identifier", "Identifier", Multiple),
            field("active", "boolean", Singular),
            field("name", "HumanName", Multiple),
            field("telecom", "ContactPoint", Multiple),
            field("address", "Address", Multiple),
            field("gender", "code", Singular),
            field("birthDate", "date", Singular),
            field("photo", "Attachment", Multiple),
            field("communication", "CodeableConcept", Multiple),
        ],
    },
    TypeDescriptor {
        name: "Organization",
        base: Some("DomainResource"),
        fields: &[
            field("identifier", "Identifier", Multiple),
            field("active", "boolean", Singular),
            field("type", "CodeableConcept", Multiple),
            field("name", "string", Singular),
            field("alias", "string", Multiple),
            field("telecom", "ContactPoint", Multiple),
            field("address", "Address", Multiple),
            field("partOf", "Reference", Singular),
            field("endpoint", "Reference", Multiple),
        ],
    },
    TypeDescriptor {
        name: "Encounter",
        base: Some("DomainResource"),
        fields: &[
            field("identifier", "Identifier", Multiple),
            field("status", "code", Singular),
            field("class", "Coding", Singular),
            field("type", "CodeableConcept", Multiple),
            field("serviceType", "CodeableConcept", Singular),
            field("priority", "CodeableConcept", Singular),
            field("subject", "Reference", Singular),
            field("period", "Period", Singular),
            field("reasonCode", "CodeableConcept", Multiple),
            field("serviceProvider", "Reference", Singular),
            field("partOf", "Reference", Singular),
        ],
    },
    TypeDescriptor {
        name: "Condition",
        base: Some("DomainResource"),
        fields: &[
            field("identifier", "Identifier", Multiple),
            field("clinicalStatus", "CodeableConcept", Singular),
            field("verificationStatus", "CodeableConcept", Singular),
            field("category", "CodeableConcept", Multiple),
            field("severity", "CodeableConcept", Singular),
            field("code", "CodeableConcept", Singular),
            field("bodySite", "CodeableConcept", Multiple),
            field("subject", "Reference", Singular),
            field("encounter", "Reference", Singular),
            choice("onset", &["dateTime", "Age", "Period", "Range", "string"], Singular),
            choice("abatement", &["dateTime", "Age", "Period", "Range", "string"], Singular),
            field("recordedDate", "dateTime", Singular),
            field("recorder", "Reference", Singular),
            field("asserter", "Reference", Singular),
            field("note", "Annotation", Multiple),
        ],
    },
];

/// Lookup index over the built-in descriptor set.
pub struct Registry {
    by_name: HashMap<&'static str, &'static TypeDescriptor>,
    resource_types: HashMap<&'static str, ()>,
}

impl Registry {
    /// The shared registry instance. Built once, process-wide.
    pub fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(Registry::build)
    }

    fn build() -> Self {
        let mut by_name = HashMap::with_capacity(DESCRIPTORS.len());
        for desc in DESCRIPTORS {
            by_name.insert(desc.name, desc);
        }
        let resource_types = RESOURCE_TYPES.iter().map(|name| (*name, ())).collect();
        Self {
            by_name,
            resource_types,
        }
    }

    pub fn descriptor(&self, type_name: &str) -> Option<&'static TypeDescriptor> {
        self.by_name.get(type_name).copied()
    }

    /// Look up a field on a type, searching the base chain.
    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&'static FieldDescriptor> {
        let mut current = self.descriptor(type_name);
        while let Some(desc) = current {
            if let Some(f) = desc.own_field(field_name) {
                return Some(f);
            }
            current = desc.base.and_then(|b| self.descriptor(b));
        }
        None
    }

    /// True if `type_name` equals `candidate_base` or derives from it.
    pub fn is_subtype_of(&self, type_name: &str, candidate_base: &str) -> bool {
        if type_name == candidate_base {
            return true;
        }
        let mut current = self.descriptor(type_name);
        while let Some(desc) = current {
            match desc.base {
                Some(base) if base == candidate_base => return true,
                Some(base) => current = self.descriptor(base),
                None => break,
            }
        }
        // Resource types without a registered descriptor still derive from Resource.
        self.descriptor(type_name).is_none()
            && self.is_resource_type(type_name)
            && candidate_base == "Resource"
    }

    pub fn is_resource_type(&self, name: &str) -> bool {
        self.resource_types.contains_key(name)
    }

    /// True if the name refers to any known FHIR type (resource, datatype,
    /// or primitive code).
    pub fn is_fhir_type(&self, name: &str) -> bool {
        self.is_resource_type(name)
            || self.by_name.contains_key(name)
            || crate::is_primitive_code(name)
    }
}
