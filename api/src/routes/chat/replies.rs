//! Every scripted reply the pipeline can produce, in all three languages.
//!
//! Scripted replies are on-brand product copy, not error strings: any stage
//! that can short-circuit the pipeline picks its text here so the tone stays
//! uniform across languages. The one exception is [`generic_failure`], which
//! is intentionally always English — unrecoverable failures do not trust the
//! detected language (see DESIGN.md).

use fokus_core::chat::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedReply {
    Greeting,
    Paused,
    SignInRequired,
    ModerationBlocked,
    PrivacyRefusal,
    AdminRefusal,
    OffTopic,
    NotIndexed,
}

pub fn text(reply: ScriptedReply, language: Language) -> &'static str {
    use Language::*;
    use ScriptedReply::*;

    match (reply, language) {
        (Greeting, English) => "Hello! How can I help you stay focused today?",
        (Greeting, Russian) => "Привет! Чем я могу помочь вам сегодня оставаться в фокусе?",
        (Greeting, Uzbek) => "Salom! Bugun diqqatingizni jamlashda qanday yordam bera olaman?",

        (Paused, English) => {
            "The assistant is paused for maintenance right now. Please try again a bit later."
        }
        (Paused, Russian) => {
            "Ассистент временно приостановлен на обслуживание. Пожалуйста, попробуйте чуть позже."
        }
        (Paused, Uzbek) => {
            "Yordamchi hozircha texnik tanaffusda. Iltimos, birozdan so'ng qayta urinib ko'ring."
        }

        (SignInRequired, English) => {
            "Please sign in to your Fokus account so I can look that up for you."
        }
        (SignInRequired, Russian) => {
            "Пожалуйста, войдите в свой аккаунт Fokus, чтобы я мог это показать."
        }
        (SignInRequired, Uzbek) => {
            "Buni ko'rsatishim uchun, iltimos, Fokus hisobingizga kiring."
        }

        (ModerationBlocked, English) => {
            "I can't help with that. Let's keep the conversation about your focus practice."
        }
        (ModerationBlocked, Russian) => {
            "Я не могу с этим помочь. Давайте вернёмся к вашей практике фокуса."
        }
        (ModerationBlocked, Uzbek) => {
            "Bunda yordam bera olmayman. Keling, diqqat mashqlaringizga qaytaylik."
        }

        (PrivacyRefusal, English) => {
            "I don't share personal or contact details here. You can manage your own data in profile settings."
        }
        (PrivacyRefusal, Russian) => {
            "Я не раскрываю личные и контактные данные здесь. Свои данные вы можете посмотреть в настройках профиля."
        }
        (PrivacyRefusal, Uzbek) => {
            "Shaxsiy va aloqa ma'lumotlarini bu yerda oshkor qilmayman. O'z ma'lumotlaringizni profil sozlamalarida ko'rishingiz mumkin."
        }

        (AdminRefusal, English) => {
            "That's internal operational information I can't share. Is there something about Fokus itself I can help with?"
        }
        (AdminRefusal, Russian) => {
            "Это внутренняя служебная информация, которой я не делюсь. Могу помочь с чем-то про сам Fokus?"
        }
        (AdminRefusal, Uzbek) => {
            "Bu ichki xizmat ma'lumoti, uni ulasha olmayman. Fokus haqida boshqa biror narsada yordam beraymi?"
        }

        (OffTopic, English) => {
            "I'm the Fokus assistant, so I stick to focus sessions, tasks, streaks and bookings. What can I help you with there?"
        }
        (OffTopic, Russian) => {
            "Я ассистент Fokus и отвечаю про фокус-сессии, задачи, стрики и брони. Чем помочь из этого?"
        }
        (OffTopic, Uzbek) => {
            "Men Fokus yordamchisiman: fokus-sessiyalar, vazifalar, striklar va bronlar bo'yicha javob beraman. Shulardan qaysi birida yordam kerak?"
        }

        (NotIndexed, English) => {
            "I don't have good material on that yet. Try rephrasing, or ask about sessions, tasks, streaks or bookings."
        }
        (NotIndexed, Russian) => {
            "У меня пока нет хорошего материала по этому вопросу. Попробуйте переформулировать или спросите про сессии, задачи, стрики и брони."
        }
        (NotIndexed, Uzbek) => {
            "Bu savol bo'yicha hali yetarli ma'lumotim yo'q. Boshqacha so'rab ko'ring yoki sessiyalar, vazifalar, striklar va bronlar haqida so'rang."
        }
    }
}

/// Reply for unrecoverable failures. Always in the platform default language.
pub fn generic_failure() -> &'static str {
    "Something went wrong on our side. Please try again in a moment."
}
