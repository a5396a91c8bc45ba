//! Static catalogs the term generator draws from (Fortaleza, CE).

pub const CITY: &str = "fortaleza";

pub const NEIGHBORHOODS: &[&str] = &[
    "Aldeota",
    "Meireles",
    "Centro",
    "Cocó",
    "Papicu",
    "Fátima",
    "Benfica",
    "Montese",
    "Parquelândia",
    "Messejana",
    "Cambeba",
    "Edson Queiroz",
    "Água Fria",
    "Guararapes",
    "Dionísio Torres",
    "Joaquim Távora",
    "Varjota",
    "Mucuripe",
    "Praia de Iracema",
    "Praia do Futuro",
    "Jacarecanga",
    "Parangaba",
    "Maraponga",
    "Passaré",
    "Cidade dos Funcionários",
    "Sapiranga",
    "Lagoa Redonda",
    "Rodolfo Teófilo",
    "Bairro de Fátima",
    "Damas",
    "Jóquei Clube",
    "Vila União",
    "Henrique Jorge",
    "Antônio Bezerra",
    "Barra do Ceará",
    "Conjunto Ceará",
    "Mondubim",
    "José Walter",
    "Serrinha",
    "Itaperi",
];

pub const BUSINESS_TYPES: &[&str] = &[
    "dentista",
    "clínica odontológica",
    "clínica médica",
    "clínica veterinária",
    "pet shop",
    "academia",
    "estúdio de pilates",
    "salão de beleza",
    "barbearia",
    "clínica de estética",
    "restaurante",
    "pizzaria",
    "hamburgueria",
    "padaria",
    "cafeteria",
    "escritório de advocacia",
    "escritório de contabilidade",
    "imobiliária",
    "construtora",
    "arquiteto",
    "loja de móveis",
    "loja de roupas",
    "ótica",
    "farmácia de manipulação",
    "laboratório de análises",
    "fisioterapia",
    "psicólogo",
    "nutricionista",
    "escola de idiomas",
    "escola particular",
    "autoescola",
    "oficina mecânica",
    "lava jato",
    "auto peças",
    "loja de material de construção",
    "vidraçaria",
    "serralheria",
    "gráfica",
    "agência de viagens",
    "buffet",
    "floricultura",
    "lavanderia",
    "chaveiro",
    "assistência técnica de celular",
];

/// Cycled by index for the `new_business` strategy.
pub const NEW_BUSINESS_MODIFIERS: &[&str] = &["inaugurou", "novo", "recém aberto", "inauguração"];
