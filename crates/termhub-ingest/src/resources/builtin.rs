//! Built-in resources

use csv::StringRecord;
use std::sync::Arc;

use super::transforms::{cellosaurus_to_canonical, join_taxonomy};
use super::ResourceDescriptor;
use crate::config::IngestConfig;
use crate::error::Result;
use crate::pipeline::{Branch, Codec, Recipe, Step};
use crate::records::{
    CanonicalReader, ColumnLayout, ColumnsReader, DmpReader, EntityRule, IdPrefix, OboReader,
    RecordReader, XmlLayout, XmlReader,
};

const OBO_PURL: &str = "http://purl.obolibrary.org/obo/";
const MESH_URI: &str = "http://id.nlm.nih.gov/mesh/";
const MESH_XML: &str = "https://nlmpubs.nlm.nih.gov/projects/mesh/MESH_FILES/xmlmesh";
const RXNORM_ZIP: &str = "https://download.nlm.nih.gov/umls/kss/rxnorm/RxNorm_full_current.zip";
const UTS_DOWNLOAD: &str = "https://uts-ws.nlm.nih.gov/download";

/// `GO:0008150` → `http://purl.obolibrary.org/obo/GO_0008150`
fn obo_uri(id: &str) -> String {
    format!("{}{}", OBO_PURL, id.replace(':', "_"))
}

/// Entity type from the top-level category of a MeSH tree number
fn mesh_category(tree_number: &str) -> Option<String> {
    let category = match tree_number.chars().next()? {
        'A' => "anatomy",
        'B' => "organism",
        'C' => "disease",
        'D' => "chemical",
        'E' => "procedure",
        'F' => "behavior",
        'G' => "phenomenon",
        'H' => "discipline",
        'I' => "social phenomenon",
        'J' => "technology",
        'K' => "humanities",
        'L' => "information science",
        'M' => "population group",
        'N' => "health care",
        'V' => "publication type",
        'Z' => "geographic location",
        _ => return None,
    };
    Some(category.to_string())
}

/// Current, unsuppressed RxNorm atoms
fn rxnorm_atom(record: &StringRecord) -> bool {
    record.get(11) == Some("RXNORM") && record.get(16) == Some("N")
}

fn descriptor(
    name: &'static str,
    resource_label: &'static str,
    entity_type: &'static str,
    recipes: Vec<Recipe>,
    reader: Arc<dyn RecordReader>,
) -> ResourceDescriptor {
    ResourceDescriptor {
        name,
        resource_label,
        entity_type,
        recipes,
        reader,
        uri_prefix: None,
        reference: None,
        missing_credential: None,
    }
}

fn obo(
    name: &'static str,
    label: &'static str,
    entity: &'static str,
    url: &str,
    steps: Vec<Step>,
    reader: OboReader,
) -> Result<ResourceDescriptor> {
    Ok(ResourceDescriptor {
        uri_prefix: Some(IdPrefix::Mapped(obo_uri)),
        ..descriptor(name, label, entity, vec![Recipe::new(url, steps)?], Arc::new(reader))
    })
}

fn ctd(name: &'static str, entity: &'static str, file: &str) -> Result<ResourceDescriptor> {
    let layout = ColumnLayout {
        strip_id_prefix: Some("MESH:"),
        ..ColumnLayout::tsv(1, 0, &[7])
    };
    let recipe = Recipe::new(
        format!("http://ctdbase.org/reports/{}.gz", file),
        vec![Step::Decompress(Codec::Gz), Step::write(file)],
    )?;
    Ok(ResourceDescriptor {
        uri_prefix: Some(IdPrefix::Fixed(MESH_URI.to_string())),
        reference: Some("mesh"),
        ..descriptor(name, "CTD", entity, vec![recipe], Arc::new(ColumnsReader::new(layout)))
    })
}

fn mesh(year: u16) -> Result<ResourceDescriptor> {
    let synonyms = vec!["ConceptList/Concept/TermList/Term/String"];
    let reader = XmlReader::new(vec![
        XmlLayout {
            record: "DescriptorRecord",
            id: "DescriptorUI",
            preferred: "DescriptorName/String",
            synonyms: synonyms.clone(),
            entity: EntityRule::Path {
                path: "TreeNumberList/TreeNumber",
                map: mesh_category,
            },
        },
        // Supplementary concepts have no tree numbers; most are chemicals
        XmlLayout {
            record: "SupplementalRecord",
            id: "SupplementalRecordUI",
            preferred: "SupplementalRecordName/String",
            synonyms,
            entity: EntityRule::Default,
        },
    ]);
    let recipes = vec![
        Recipe::new(format!("{}/desc{}.xml", MESH_XML, year), vec![Step::write("desc.xml")])?,
        Recipe::new(format!("{}/supp{}.xml", MESH_XML, year), vec![Step::write("supp.xml")])?,
    ];
    Ok(ResourceDescriptor {
        uri_prefix: Some(IdPrefix::Fixed(MESH_URI.to_string())),
        ..descriptor("mesh", "MeSH", "chemical", recipes, Arc::new(reader))
    })
}

fn rxnorm(api_key: Option<&str>) -> Result<ResourceDescriptor> {
    let url = match api_key {
        Some(key) => format!("{}?url={}&apiKey={}", UTS_DOWNLOAD, RXNORM_ZIP, key),
        None => format!("{}?url={}", UTS_DOWNLOAD, RXNORM_ZIP),
    };
    let recipe = Recipe::new(
        url,
        vec![
            Step::Decompress(Codec::Zip),
            Step::Fork(vec![Branch::new(
                "rrf/RXNCONSO.RRF",
                vec![Step::write("RXNCONSO.RRF")],
            )]),
        ],
    )?;
    let layout = ColumnLayout {
        delimiter: b'|',
        comment: None,
        sub_delimiter: None,
        group_by_id: true,
        row_filter: Some(rxnorm_atom),
        ..ColumnLayout::tsv(0, 14, &[14])
    };
    Ok(ResourceDescriptor {
        uri_prefix: Some(IdPrefix::Fixed(
            "http://purl.bioontology.org/ontology/RXNORM/".to_string(),
        )),
        missing_credential: api_key.is_none().then_some("UMLS_API_KEY"),
        ..descriptor("rxnorm", "RxNorm", "drug", vec![recipe], Arc::new(ColumnsReader::new(layout)))
    })
}

fn swissprot() -> Result<ResourceDescriptor> {
    let reader = XmlReader::new(vec![XmlLayout {
        record: "entry",
        id: "accession",
        preferred: "protein/recommendedName/fullName",
        synonyms: vec![
            "protein/recommendedName/shortName",
            "protein/alternativeName/fullName",
            "protein/alternativeName/shortName",
            "gene/name",
        ],
        entity: EntityRule::Default,
    }]);
    let recipe = Recipe::new(
        "https://ftp.uniprot.org/pub/databases/uniprot/current_release/knowledgebase/complete/uniprot_sprot.xml.gz",
        vec![Step::Decompress(Codec::Gz), Step::write("uniprot_sprot.xml")],
    )?;
    Ok(ResourceDescriptor {
        uri_prefix: Some(IdPrefix::Fixed("http://purl.uniprot.org/uniprot/".to_string())),
        ..descriptor("swissprot", "Swiss-Prot", "protein", vec![recipe], Arc::new(reader))
    })
}

fn taxonomy() -> Result<ResourceDescriptor> {
    let recipe = Recipe::new(
        "https://ftp.ncbi.nlm.nih.gov/pub/taxonomy/taxdump.tar.gz",
        vec![
            Step::Decompress(Codec::Gz),
            Step::Decompress(Codec::Tar),
            Step::Fork(vec![
                Branch::new("names.dmp", vec![]),
                Branch::new("nodes.dmp", vec![]),
            ]),
            Step::Merge(join_taxonomy),
            Step::write("taxonomy.dmp"),
        ],
    )?;
    Ok(ResourceDescriptor {
        uri_prefix: Some(IdPrefix::Fixed(format!("{}NCBITaxon_", OBO_PURL))),
        ..descriptor("taxonomy", "NCBI Taxonomy", "organism", vec![recipe], Arc::new(DmpReader))
    })
}

pub(super) fn descriptors(config: &IngestConfig) -> Result<Vec<ResourceDescriptor>> {
    let cellosaurus = Recipe::new(
        "https://ftp.expasy.org/databases/cellosaurus/cellosaurus.txt",
        vec![Step::Transform(cellosaurus_to_canonical), Step::write("cellosaurus.tsv")],
    )?;
    let entrezgene = Recipe::new(
        "ftp://ftp.ncbi.nlm.nih.gov/gene/DATA/gene_info.gz",
        vec![Step::Decompress(Codec::Gz), Step::write("gene_info.tsv")],
    )?;
    let gene_info = ColumnLayout {
        null_token: Some("-"),
        ..ColumnLayout::tsv(1, 2, &[4, 8, 10, 11])
    };

    Ok(vec![
        ResourceDescriptor {
            uri_prefix: Some(IdPrefix::Fixed("https://www.cellosaurus.org/".to_string())),
            ..descriptor(
                "cellosaurus",
                "Cellosaurus",
                "cell line",
                vec![cellosaurus],
                Arc::new(CanonicalReader),
            )
        },
        obo(
            "cell_ontology",
            "Cell Ontology",
            "cell",
            "http://purl.obolibrary.org/obo/cl.obo",
            vec![Step::write("cl.obo")],
            OboReader::new(&["CL"]),
        )?,
        obo(
            "chebi",
            "ChEBI",
            "chemical",
            "https://ftp.ebi.ac.uk/pub/databases/chebi/ontology/chebi.obo.gz",
            vec![Step::Decompress(Codec::Gz), Step::write("chebi.obo")],
            OboReader::new(&["CHEBI"]),
        )?,
        ctd("ctd_chem", "chemical", "CTD_chemicals.tsv")?,
        ctd("ctd_disease", "disease", "CTD_diseases.tsv")?,
        ResourceDescriptor {
            uri_prefix: Some(IdPrefix::Fixed("https://www.ncbi.nlm.nih.gov/gene/".to_string())),
            ..descriptor(
                "entrezgene",
                "EntrezGene",
                "gene",
                vec![entrezgene],
                Arc::new(ColumnsReader::new(gene_info)),
            )
        },
        obo(
            "gene_ontology",
            "Gene Ontology",
            "gene ontology term",
            "http://purl.obolibrary.org/obo/go.obo",
            vec![Step::write("go.obo")],
            OboReader::new(&["GO"]).with_entity_from_namespace(),
        )?,
        mesh(config.mesh_year)?,
        rxnorm(config.umls_api_key.as_deref())?,
        obo(
            "sequence_ontology",
            "Sequence Ontology",
            "sequence",
            "https://raw.githubusercontent.com/The-Sequence-Ontology/SO-Ontologies/master/Ontology_Files/so.obo",
            vec![Step::write("so.obo")],
            OboReader::new(&["SO"]),
        )?,
        swissprot()?,
        taxonomy()?,
    ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_obo_uri() {
        assert_eq!(obo_uri("GO:0008150"), "http://purl.obolibrary.org/obo/GO_0008150");
    }

    #[test]
    fn test_mesh_category() {
        assert_eq!(mesh_category("C04.557").as_deref(), Some("disease"));
        assert_eq!(mesh_category("D03.633").as_deref(), Some("chemical"));
        assert_eq!(mesh_category("X99"), None);
    }

    #[test]
    fn test_rxnorm_filter() {
        let atom = |sab: &str, suppress: &str| {
            let mut fields = vec![""; 18];
            fields[0] = "38";
            fields[11] = sab;
            fields[14] = "Parlodel";
            fields[16] = suppress;
            StringRecord::from(fields)
        };
        assert!(rxnorm_atom(&atom("RXNORM", "N")));
        assert!(!rxnorm_atom(&atom("MTHSPL", "N")));
        assert!(!rxnorm_atom(&atom("RXNORM", "O")));
    }

    #[test]
    fn test_every_recipe_is_valid_and_dumps_are_unique() {
        let all = descriptors(&IngestConfig::default()).unwrap();
        let mut names: Vec<String> = all.iter().flat_map(|d| d.dump_names()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
